use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use log::{error, info};

use kube_trouble::cluster::kube_api::KubeConnector;
use kube_trouble::config::{ProbeSettings, Settings, DEFAULT_PROBE_PATH};
use kube_trouble::console::Console;
use kube_trouble::diagnostics::Diagnostics;

#[derive(Parser, Debug)]
#[command(name = "kube-trouble")]
#[command(version, about = "Find out why a Kubernetes workload cannot be reached")]
struct Args {
    /// Kubeconfig used when the prompt is answered with a blank line
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// HTTP path requested on each pod through the tunnel
    #[arg(long, env = "KUBE_TROUBLE_PROBE_PATH", default_value = DEFAULT_PROBE_PATH)]
    probe_path: String,

    /// Local port for tunnels; 0 picks a free one
    #[arg(long, default_value_t = 0)]
    local_port: u16,

    /// Seconds to wait for a tunnel to become ready
    #[arg(long, default_value_t = 10)]
    ready_timeout_secs: u64,

    /// Seconds allowed for each probe request
    #[arg(long, default_value_t = 5)]
    probe_timeout_secs: u64,

    /// Consecutive failures tolerated per step; 0 retries forever
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Print the gathered session as JSON at the end
    #[arg(long)]
    json: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        Settings {
            kubeconfig: args.kubeconfig,
            probe: ProbeSettings {
                path: args.probe_path,
                local_port: args.local_port,
                ready_timeout: Duration::from_secs(args.ready_timeout_secs),
                request_timeout: Duration::from_secs(args.probe_timeout_secs),
            },
            max_retries: (args.max_retries > 0).then_some(args.max_retries),
            json: args.json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();

    let settings = Settings::from(args);
    info!("probing {} with max retries {:?}", settings.probe.path, settings.max_retries);

    let connector = Arc::new(KubeConnector::new(settings.kubeconfig.clone()));
    let diagnostics = Diagnostics::new(connector, Console::stdio(), settings);

    match diagnostics.run().await {
        Ok(session) => {
            info!(
                "run finished with {} finding(s) and {} probe outcome(s)",
                session.findings.len(),
                session.outcomes.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("troubleshooting stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
