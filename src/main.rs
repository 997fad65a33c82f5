use graphite_adapter::metrics_output::csv_output::CSVCreator;
use graphite_adapter::{FilterExpr, GraphiteAdapter, GraphiteConfig, OptionValue};

const USAGE: &str =
    "usage: graphite_adapter [-from <time>] [-to <time>|:end:] [-last <duration>] <filter>";

/// Splits `-option value` pairs from the single filter argument.
fn parse_args(args: Vec<String>) -> Result<(Vec<(String, OptionValue)>, String), String> {
    let mut options = Vec::new();
    let mut filter = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if let Some(name) = arg.strip_prefix('-') {
            let value = args
                .next()
                .ok_or_else(|| format!("missing value for option -{name}"))?;
            options.push((name.to_string(), OptionValue::Text(value)));
        } else if filter.replace(arg).is_some() {
            return Err("only one filter expression may be given".to_string());
        }
    }

    let filter = filter.ok_or_else(|| USAGE.to_string())?;
    Ok((options, filter))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let (options, filter) = parse_args(std::env::args().skip(1).collect()).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let config = GraphiteConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::process::exit(1);
    });
    let adapter = GraphiteAdapter::from_config(config).unwrap_or_else(|e| {
        tracing::error!("Failed to create adapter: {}", e);
        std::process::exit(1);
    });

    let read = filter
        .parse::<FilterExpr>()
        .and_then(|filter| adapter.read(options, Some(&filter)))
        .unwrap_or_else(|e| {
            tracing::error!(code = e.code(), "{}", e);
            std::process::exit(1);
        });

    let cancel = read.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let csv_output = CSVCreator {
        writer: std::io::stdout(),
    };

    match csv_output.export_metrics(read).await {
        Ok(points) => tracing::info!(points, "read complete"),
        Err(e) => {
            tracing::error!(code = e.code(), "{}", e);
            std::process::exit(1);
        }
    }
}
