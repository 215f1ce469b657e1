// rs-dialer: drives the softphone core over stdio.
//
// stdin lines starting with `{` are engine events; anything else is a user
// command. Engine commands are written to stdout as JSON lines.

use std::sync::Arc;

use futures::future::BoxFuture;
use rs_dialer::credentials::{ExtensionCredentials, clear_extension, provision_extension};
use rs_dialer::{
    ChannelTransport, CredentialStore, EventHandler, FileCredentialStore, MemoryCredentialStore,
    OutboundFrame, PhoneEvent, Softphone, run_event_pump,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct EventPrinter;

impl EventHandler for EventPrinter {
    fn on_event<'a>(&'a self, event: PhoneEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match event {
                PhoneEvent::PresentCall(summary) => match serde_json::to_string(&summary) {
                    Ok(json) => eprintln!("present call: {}", json),
                    Err(e) => warn!(error = %e, "cannot serialize call summary"),
                },
                other => eprintln!("event: {:?}", other),
            }
        })
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  login <user> <password> [domain] - Store extension credentials");
    eprintln!("  logout                           - Forget extension credentials");
    eprintln!("  register                         - Register with the engine");
    eprintln!("  foreground                       - Re-register if idle");
    eprintln!("  call <number>                    - Place a call");
    eprintln!("  answer | decline                 - Handle the incoming call");
    eprintln!("  hangup                           - Hang up the current call");
    eprintln!("  mute | unmute                    - Microphone");
    eprintln!("  hold | resume                    - Hold the call");
    eprintln!("  speaker on|off                   - Speakerphone");
    eprintln!("  transfer <number>                - Blind transfer");
    eprintln!("  status                           - Show current status");
    eprintln!("  quit                             - Exit");
    eprintln!("Lines starting with '{{' are fed to the softphone as engine events.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let store: Arc<dyn CredentialStore> = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "using credential file");
            Arc::new(FileCredentialStore::new(path))
        }
        None => Arc::new(MemoryCredentialStore::new()),
    };

    let (transport, mut outbound_rx) = ChannelTransport::new();
    let phone = Softphone::builder()
        .transport(transport)
        .credential_store(store.clone())
        .build()?;
    phone.add_event_handler(Box::new(EventPrinter)).await;
    phone.start();

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                OutboundFrame::Message(json) => println!("{}", json),
                OutboundFrame::Reload => println!(r#"{{"type":"reload"}}"#),
            }
        }
    });

    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    tokio::spawn(run_event_pump(inbound_rx, phone.clone()));

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('{') {
            inbound_tx.send(line.to_string()).await?;
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["login", username, password, rest @ ..] => {
                let extension = ExtensionCredentials {
                    username: username.to_string(),
                    password: password.to_string(),
                    domain: rest.first().map(|d| d.to_string()),
                    ..Default::default()
                };
                match provision_extension(store.as_ref(), extension).await {
                    Ok(()) => eprintln!("Credentials stored"),
                    Err(e) => eprintln!("Login failed: {}", e),
                }
            }
            ["logout"] => {
                phone.hangup();
                match clear_extension(store.as_ref()).await {
                    Ok(()) => eprintln!("Credentials cleared"),
                    Err(e) => eprintln!("Logout failed: {}", e),
                }
            }
            ["register"] => match phone.register().await {
                Ok(outcome) => eprintln!("Register: {:?}", outcome),
                Err(e) => eprintln!("Register failed: {}", e),
            },
            ["foreground"] => match phone.on_foreground().await {
                Ok(outcome) => eprintln!("Foreground: {:?}", outcome),
                Err(e) => eprintln!("Register failed: {}", e),
            },
            ["call", target] => match phone.dial(target).await {
                Ok(outcome) => eprintln!("Dial: {:?}", outcome),
                Err(e) => eprintln!("Dial failed: {}", e),
            },
            ["answer"] => {
                if !phone.answer().await {
                    eprintln!("No incoming call");
                }
            }
            ["decline"] => {
                if !phone.decline().await {
                    eprintln!("No incoming call");
                }
            }
            ["hangup"] => {
                if !phone.hangup() {
                    eprintln!("No active call");
                }
            }
            ["mute"] | ["unmute"] => match phone.mute(parts[0] == "mute") {
                Ok(true) => {}
                Ok(false) => eprintln!("No active call"),
                Err(e) => eprintln!("Mute failed: {}", e),
            },
            ["hold"] => match phone.hold() {
                Ok(applied) => eprintln!("Hold: {}", applied),
                Err(e) => eprintln!("Hold failed: {}", e),
            },
            ["resume"] => match phone.resume() {
                Ok(applied) => eprintln!("Resume: {}", applied),
                Err(e) => eprintln!("Resume failed: {}", e),
            },
            ["speaker", setting] => {
                if !phone.set_speaker(*setting == "on") {
                    eprintln!("No active call");
                }
            }
            ["transfer", target] => match phone.transfer(target).await {
                Ok(applied) => eprintln!("Transfer: {}", applied),
                Err(e) => eprintln!("Transfer failed: {}", e),
            },
            ["status"] => {
                eprintln!("Call state: {}", phone.call_state());
                eprintln!("Registration: {:?}", phone.registration_state());
                eprintln!("Audio: {:?}", phone.audio_flags());
                if let Some(session) = phone.session() {
                    eprintln!("Remote: {} ({:?})", session.remote_party, session.direction);
                    eprintln!("Duration: {}", phone.formatted_duration());
                }
                if let Some(invite) = phone.incoming_invite() {
                    eprintln!("Ringing: {}", invite.display_name());
                }
            }
            ["quit"] | ["exit"] => break,
            ["help"] => print_help(),
            _ => eprintln!("Unknown command: {}", line),
        }
    }

    phone.hangup();
    info!("rs-dialer exiting");
    Ok(())
}
