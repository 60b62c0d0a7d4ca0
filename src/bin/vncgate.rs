use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use vncgate::config::ProxyConfig;
use vncgate::core::{create_server_state, SharedServerState, Signal};
use vncgate::proxy::decision::{DecisionProvider, HeadlessDecision, PromptDecision};
use vncgate::proxy::ProxyState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file: Option<String> = None;
    let mut vnc_host: Option<String> = None;
    let mut vnc_port: Option<u16> = None;
    let mut listen_port: Option<u16> = None;
    let mut headless = false;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!(
                    "Usage: vncgate [--conf FILE] [--vnc-host HOST] [--vnc-port PORT] \
                     [--listen-port PORT] [--headless]"
                );
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = Some(args[i].clone());
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            "--vnc-host" => {
                if i + 1 < args.len() {
                    i += 1;
                    vnc_host = Some(args[i].clone());
                } else {
                    eprintln!("Error: --vnc-host requires a HOST argument");
                    return Ok(());
                }
            }
            "--vnc-port" => {
                if i + 1 < args.len() {
                    i += 1;
                    let port = args[i]
                        .parse::<u16>()
                        .with_context(|| format!("Invalid --vnc-port: {}", args[i]))?;
                    vnc_port = Some(port);
                } else {
                    eprintln!("Error: --vnc-port requires a PORT argument");
                    return Ok(());
                }
            }
            "--listen-port" => {
                if i + 1 < args.len() {
                    i += 1;
                    let port = args[i]
                        .parse::<u16>()
                        .with_context(|| format!("Invalid --listen-port: {}", args[i]))?;
                    listen_port = Some(port);
                } else {
                    eprintln!("Error: --listen-port requires a PORT argument");
                    return Ok(());
                }
            }
            "--headless" => headless = true,
            _ => {}
        }
        i += 1;
    }

    let mut config = match &conf_file {
        Some(path) => {
            ProxyConfig::from_file(path).with_context(|| format!("Cannot load config: {}", path))?
        }
        None => ProxyConfig::default(),
    };
    if let Some(host) = vnc_host {
        config.vnc_host = host;
    }
    if let Some(port) = vnc_port {
        config.vnc_port = port;
    }
    if let Some(port) = listen_port {
        config.listen_port = Some(port);
    }
    if headless {
        config.headless = true;
    }
    config.validate()?;

    let decider: Box<dyn DecisionProvider> = if config.headless {
        tracing::info!("[vncgate] headless mode: contention keeps the current session");
        Box::new(HeadlessDecision)
    } else {
        Box::new(PromptDecision::spawn(config.decision_window()))
    };

    tracing::info!(
        "[vncgate] [started] backend={}:{} listen={}",
        config.vnc_host,
        config.vnc_port,
        config.listen_port()
    );

    let server = create_server_state();
    tokio::spawn(watch_signals(Arc::clone(&server)));

    let bind = format!("0.0.0.0:{}", config.listen_port());
    let state = Arc::new(ProxyState::new(config, decider));

    ProxyState::run(state, &bind, server).await?;

    tracing::info!("[vncgate] [stopped]");
    Ok(())
}

/// Flip the shutdown flag on the first terminating signal.
async fn watch_signals(server: SharedServerState) {
    let mut interrupt = match signal(SignalKind::from_raw(Signal::Interrupt.raw())) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("[vncgate] [signal_setup_failed] err={}", e);
            return;
        }
    };
    let mut terminate = match signal(SignalKind::from_raw(Signal::Terminate.raw())) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("[vncgate] [signal_setup_failed] err={}", e);
            return;
        }
    };

    let sig = tokio::select! {
        _ = interrupt.recv() => Signal::Interrupt,
        _ = terminate.recv() => Signal::Terminate,
    };

    if sig.should_shutdown() {
        tracing::info!("[vncgate] [signal] {:?} received, stopping", sig);
        server.lock().unwrap().request_shutdown();
    }
}
