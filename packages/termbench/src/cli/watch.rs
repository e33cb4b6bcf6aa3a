use anyhow::Result;
use channel_hub::{Envelope, SharedChannelHub};

/// Print every message on the shared channel until Ctrl-C.
pub async fn watch(hub: SharedChannelHub, topics: Vec<String>, json: bool) -> Result<()> {
    let mut listener = hub.listen();
    let subscriptions: Vec<_> = topics.into_iter().map(|t| hub.subscribe(t)).collect();
    let mut connected = listener.connected();
    if !json && !subscriptions.is_empty() {
        let topics: Vec<&str> = subscriptions.iter().map(|s| s.topic()).collect();
        eprintln!("[bench: watching {}]", topics.join(", "));
    }

    loop {
        tokio::select! {
            Some(envelope) = listener.recv() => print_envelope(&envelope, json)?,

            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let up = *connected.borrow_and_update();
                if !json {
                    eprintln!("[bench: channel {}]", if up { "connected" } else { "disconnected" });
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_envelope(envelope: &Envelope, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(envelope)?);
    } else {
        println!("{:<20} {}", envelope.kind, envelope.payload);
    }
    Ok(())
}
