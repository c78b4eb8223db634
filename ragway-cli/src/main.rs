use clap::Parser;
use ragway_cli::{Cli, build_gateway, request_context, run};
use ragway_telemetry::SpanStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let spans = SpanStore::new();
    if cli.json_logs {
        ragway_telemetry::init_json_telemetry("ragway-cli")?;
    } else {
        ragway_telemetry::init_with_store("ragway-cli", spans.clone())?;
    }

    let gateway = build_gateway(cli.offline)?;
    let ctx = request_context(cli.timeout);

    // Ctrl-C cancels in-flight model calls.
    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let trace_store = (!cli.json_logs).then_some(&spans);
    let mut stdout = std::io::stdout().lock();
    run(cli.command, gateway, &ctx, trace_store, &mut stdout).await
}
