use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::infrastructure::config::LogConfig;

/// ログ出力を初期化する。`RUST_LOG` が設定されていれば設定ファイルより優先する。
pub fn init_logging(cfg: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| anyhow::anyhow!("invalid log level {}: {}", cfg.level, e))?;
    let registry = tracing_subscriber::registry().with(filter);

    if cfg.format == "text" {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(fmt_layer).try_init()?;
    }
    Ok(())
}
