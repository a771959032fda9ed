use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tick_api::ClientMessage;

use super::config::SubArgs;
use super::error::SubError;
use super::meter::{FrameKind, Meter};

const REPORT_PERIOD: Duration = Duration::from_secs(1);

pub async fn run(args: &SubArgs) -> Result<(), SubError> {
    tracing::info!(url = %args.url, id = %args.id, "connecting");
    let (mut socket, _) = connect_async(args.url.as_str()).await?;
    tracing::info!(url = %args.url, "connected");

    let identify = ClientMessage::Identify {
        subscriber_id: args.id.clone(),
    };
    socket.send(Message::text(identify.to_json())).await?;

    let mut meter = Meter::new(args.sample_every);
    let mut ticker = tokio::time::interval_at(Instant::now() + REPORT_PERIOD, REPORT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut window_start = Instant::now();

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            frame = socket.next() => {
                match frame {
                    Some(Ok(Message::Binary(bytes))) => meter.observe(FrameKind::Binary, &bytes),
                    Some(Ok(Message::Text(text))) => meter.observe(FrameKind::Text, text.as_bytes()),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("server closed the stream");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            _ = ticker.tick() => {
                let now = Instant::now();
                let report = meter.roll(&args.id, now.duration_since(window_start));
                window_start = now;
                tracing::info!(
                    rate = report.messages_per_second.round() as u64,
                    total = report.total_messages,
                    avg_latency_ms = report.avg_latency_ms,
                    p99_latency_ms = report.p99_latency_ms,
                    "window"
                );
                socket.send(Message::text(ClientMessage::Stats(report).to_json())).await?;
            }

            _ = &mut stop => {
                tracing::info!("duration elapsed");
                break;
            }

            res = &mut ctrl_c => {
                res?;
                tracing::info!("interrupted");
                break;
            }
        }
    }

    if let Err(e) = socket.close(None).await {
        tracing::debug!(error = %e, "close handshake failed");
    }
    tracing::info!(
        total = meter.total(),
        decode_errors = meter.decode_errors(),
        "disconnected"
    );
    Ok(())
}
