use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PLANORA_LOG";

fn default_directives(component: &str) -> String {
    format!("info,planora=debug,{component}=debug,hyper=warn,reqwest=warn")
}

/// `PLANORA_LOG` wins over `RUST_LOG`; unparsable values fall through to the
/// next source.
pub fn build_filter(component: &str) -> EnvFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(component)))
}

pub fn init_tracing(component: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(component))
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(component, "Tracing initialised");
    }
}
