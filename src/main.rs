// src/main.rs - Heater daemon: control loop, broadcast hub and HTTP API
use clap::Parser;
use pi_heater::config::{self, Config};
use pi_heater::control::ControlLoop;
use pi_heater::hardware::{self, Switch, TemperatureSensor};
use pi_heater::hub::BroadcastHub;
use pi_heater::pid::PidController;
use pi_heater::sim::SimulatedPlant;
use pi_heater::web::{self, AppStateInner};
use pi_heater::HeaterError;
use std::path::PathBuf;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "pi-heater", about = "Keep things toasty: PID heater controller")]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Starting target temperature (0 keeps the configured value)
    #[arg(short = 't', long = "target", default_value_t = 0.0)]
    target: f64,

    /// Run against a simulated plant instead of the device files
    #[arg(long)]
    simulate: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!("Starting pi-heater {}", env!("CARGO_PKG_VERSION"));

    let config = load(&cli).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        BoxError::from(e)
    })?;

    let result = if cli.simulate {
        tracing::info!("Running against a simulated plant");
        let (sensor, switch) = SimulatedPlant::default().with_noise(0.1).split();
        run(config, sensor, switch).await
    } else {
        let opened = async {
            let sensor =
                hardware::open_sensor(&config.devices.temperature, config.calibration.clone())
                    .await?;
            let switch = hardware::open_switch(&config.devices.status).await?;
            Ok::<_, HeaterError>((sensor, switch))
        };
        match opened.await {
            Ok((sensor, switch)) => run(config, sensor, switch).await,
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        return Err(BoxError::from(e));
    }
    Ok(())
}

fn load(cli: &Cli) -> Result<Config, HeaterError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            config::load_config(path)?
        }
        None => Config::default(),
    };
    config.apply_env(std::env::vars())?;
    if cli.target != 0.0 {
        config.control.start_target = cli.target;
    }
    config.validate()?;
    Ok(config)
}

async fn run<S, A>(config: Config, sensor: S, switch: A) -> Result<(), HeaterError>
where
    S: TemperatureSensor,
    A: Switch,
{
    let pid = PidController::from(&config.pid);
    let (p, i, d) = pid.gains();
    tracing::info!("PID parameters: P={} I={} D={} max={}", p, i, d, config.control.window_ms);
    tracing::info!("Setting initial temperature to {:.2}", config.control.start_target);

    let control_loop = ControlLoop::new(&config.control, pid, sensor, switch)?;
    let hub = BroadcastHub::new(control_loop.frames()).spawn();
    let control = control_loop.spawn();

    let state = Arc::new(AppStateInner {
        control: control.clone(),
        hub: hub.clone(),
        queue_capacity: config.hub.queue_capacity,
    });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Starting HTTP server on http://{}", listener.local_addr()?);

    let shutdown = {
        let control = control.clone();
        let hub = hub.clone();
        async move {
            wait_for_signal().await;
            tracing::info!("Received kill signal");
            control.stop().await;
            hub.stop().await;
        }
    };
    let served = web::serve(listener, state, shutdown).await;
    if let Err(e) = &served {
        tracing::error!("Error from HTTP server: {}", e);
    }

    // Both are no-ops after a signal-driven shutdown.
    control.stop().await;
    hub.stop().await;
    served.map_err(HeaterError::from)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
