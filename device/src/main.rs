//! Simulated Smart Light device
//!
//! Connects to the device channel, registers, and applies `setOn` / `setOff`
//! actions, reporting the new state after each one.

mod light;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use light::SmartLight;
use smartlight_shared::codec::{self, Inbound};
use smartlight_shared::{endpoints, now_ms, RegisterMessage};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "smartlight-device", version, about = "Simulated Smart Light")]
struct Cli {
    #[arg(long, env = "SMARTLIGHT_DEVICE_ID")]
    device_id: String,

    #[arg(long, env = "SMARTLIGHT_DEVICE_TOKEN", hide_env_values = true)]
    device_token: String,

    /// Device channel endpoint
    #[arg(long, default_value = endpoints::DEVICE_CHANNEL_URL)]
    url: String,

    /// Output pin the LED is wired to
    #[arg(long, default_value_t = light::DEFAULT_PIN)]
    pin: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A TLS crypto provider was already installed");
    }

    let cli = Cli::parse();
    for (name, value) in [("device id", &cli.device_id), ("device token", &cli.device_token)] {
        if value.trim().is_empty() || value.starts_with("<YOUR") {
            bail!("{} is not set", name);
        }
    }

    let mut light = SmartLight::new(cli.pin);
    let result = run(&cli, &mut light).await;

    // Never leave the light on behind us
    light.switch_off();
    info!("Exiting");
    result
}

async fn run(cli: &Cli, light: &mut SmartLight) -> Result<()> {
    let (ws, _) = connect_async(cli.url.as_str())
        .await
        .context("WebSocket handshake failed")?;
    info!("WebSocket connection is open");
    let (mut sink, mut stream) = ws.split();

    let register = RegisterMessage::new(now_ms().to_string(), cli.device_id.as_str(), &cli.device_token);
    info!("Registering device {}", cli.device_id);
    sink.send(WsMessage::Text(codec::encode(&register)?.into()))
        .await
        .context("Failed to send registration")?;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = handle_frame(light, &cli.device_id, text.as_str()) {
                            debug!("Sending {}", reply);
                            if let Err(e) = sink.send(WsMessage::Text(reply.into())).await {
                                warn!("Failed to send state: {}", e);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!("WebSocket connection is closed: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket connection dropped");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Process one inbound frame; returns the state report to send, if any
fn handle_frame(light: &mut SmartLight, device_id: &str, text: &str) -> Option<String> {
    match codec::decode(text) {
        Ok(Inbound::Action(action)) => {
            // Only the first action of a request is applied
            let name = action.first_action()?;
            info!("Received action {}", name);
            light.apply(name)?;

            match codec::encode(&light.state_message(device_id, now_ms())) {
                Ok(reply) => Some(reply),
                Err(e) => {
                    warn!("Failed to encode state: {}", e);
                    None
                }
            }
        }
        Ok(Inbound::Ack(ack)) => {
            info!("Ack: {:?} {:?}", ack.cid, ack.message);
            None
        }
        Ok(Inbound::Error(err)) => {
            warn!("Broker error: {}", err.message);
            None
        }
        Ok(Inbound::Ping { ts }) => {
            trace!("ping {}", ts);
            None
        }
        Ok(Inbound::Message(_)) => None,
        Err(e) => {
            warn!("Undecodable frame: {}", e);
            None
        }
    }
}
