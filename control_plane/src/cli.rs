use clap::{Parser, ValueEnum};
use getset::{CopyGetters, Getters};
use portico_api::constants::GATEWAY_CLASS_CONTROLLER_NAME;
use portico_core::instrumentation::LogFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser, Getters, CopyGetters)]
#[command(about = "Gateway API control plane for Portico", long_about = None)]
pub struct Cli {
    #[getset(get = "pub")]
    #[arg(
        default_value = GATEWAY_CLASS_CONTROLLER_NAME,
        env = "PORTICO_CONTROLLER_NAME",
        long = "controller-name"
    )]
    controller_name: String,

    #[getset(get_copy = "pub")]
    #[arg(default_value = "2", env = "PORTICO_WORKERS", long = "workers")]
    workers: usize,

    #[getset(get_copy = "pub")]
    #[arg(default_value = "1024", env = "PORTICO_QUEUE_CAPACITY", long = "queue-capacity")]
    queue_capacity: usize,

    #[getset(get_copy = "pub")]
    #[arg(value_enum, default_value = "text", env = "PORTICO_LOG_FORMAT", long = "log-format")]
    log_format: LogFormatArg,
}
