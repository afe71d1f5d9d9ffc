diesel::table! {
    study_plans (id) {
        id -> Integer,
        user_id -> Integer,
        exam_name -> Text,
        subject -> Text,
        exam_date -> Text,
        study_hours_per_day -> Integer,
        level -> Text,
        topics_json -> Text,
        plan_content -> Nullable<Text>,
        status -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    plan_progress (id) {
        id -> Integer,
        study_plan_id -> Integer,
        date -> Text,
        completed -> Bool,
        completion_percentage -> Integer,
        notes -> Nullable<Text>,
    }
}

diesel::joinable!(plan_progress -> study_plans (study_plan_id));
diesel::allow_tables_to_appear_in_same_query!(study_plans, plan_progress);
