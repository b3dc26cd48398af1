//! Application entry point: a terminal voice assistant.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Parse the command line and load [`AppConfig`] (defaults on first run).
//! 3. Build the chat backend, synthesizer and audio output.
//! 4. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 5. Answer a single prompt from the command line, or read prompts from
//!    stdin until EOF.
//!
//! Ctrl-C during a turn cancels the reply; Ctrl-C while idle exits.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use voice_assistant::{
    audio::{AudioOutput, CpalOutput, WavFileOutput},
    config::AppConfig,
    llm::OllamaChat,
    pipeline::{TurnEvent, VoiceSession},
    text::CancelHandle,
    tts::HttpSynthesizer,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "voice-assistant", version, about = "Speak a chat model's replies as they stream")]
struct Cli {
    /// Path to settings.toml (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the spoken reply to a WAV file instead of the sound device
    #[arg(long)]
    wav: Option<PathBuf>,

    /// One-shot prompt; omit to read prompts from stdin
    prompt: Vec<String>,
}

// ---------------------------------------------------------------------------
// Event printer
// ---------------------------------------------------------------------------

/// Prints what the pipeline reports.  Reply text goes to stdout as soon as
/// the model has finished streaming; everything else is logged.
async fn print_events(mut events: mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::Phase(phase) => log::debug!("phase: {}", phase.label()),
            TurnEvent::Synthesizing { index } => log::debug!("synthesizing sentence {index}"),
            TurnEvent::ReplyText(text) => println!("{text}"),
            TurnEvent::Complete(summary) => {
                if summary.skipped > 0 {
                    log::warn!("{} sentence(s) could not be spoken", summary.skipped);
                }
                if summary.stalled {
                    eprintln!("warning: audio output stopped responding; the rest of the reply was not played");
                }
                if summary.underruns > 0 {
                    log::info!("playback underruns: {}", summary.underruns);
                }
                if let Some(failure) = summary.failure {
                    eprintln!("error: {failure}");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Turn driver
// ---------------------------------------------------------------------------

/// Runs one turn with a fresh cancellation guard.  Returns `true` when the
/// turn completed, `false` when it failed (the failure is already reported).
async fn ask(
    session: &mut VoiceSession,
    prompt: &str,
    events: &mpsc::UnboundedSender<TurnEvent>,
    cancel: &CancelHandle,
    busy: &AtomicBool,
) -> bool {
    cancel.reset();
    busy.store(true, Ordering::SeqCst);
    let outcome = session.run_turn(prompt, events, cancel.token()).await;
    busy.store(false, Ordering::SeqCst);

    match outcome {
        Ok(summary) => {
            if summary.cancelled {
                log::info!("reply cancelled after {} sentence(s)", summary.sentences);
            }
            true
        }
        Err(e) => {
            log::error!("turn failed: {e}");
            false
        }
    }
}

fn prompt_marker() {
    eprint!("> ");
    let _ = std::io::stderr().flush();
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Configuration
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    log::info!(
        "voice assistant starting (model {}, voice {})",
        config.llm.model,
        config.tts.voice
    );

    // 3. Collaborators.  The synthesizer owns a blocking HTTP client, so it
    //    is built (and later dropped) outside the async runtime.
    let synth = HttpSynthesizer::from_config(&config.tts).context("failed to build TTS client")?;
    let output: Arc<dyn AudioOutput> = match &cli.wav {
        Some(path) => Arc::new(WavFileOutput::new(path.clone())),
        None => Arc::new(CpalOutput::new(config.audio.output_device.clone())),
    };
    let mut session = VoiceSession::new(
        &config,
        Arc::new(OllamaChat::from_config(&config.llm)),
        Arc::new(synth),
        output,
    );

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 5. Conversation
    let one_shot = (!cli.prompt.is_empty()).then(|| cli.prompt.join(" "));
    let result = rt.block_on(async {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(event_rx));

        let cancel = Arc::new(CancelHandle::new());
        let busy = Arc::new(AtomicBool::new(false));
        {
            let cancel = Arc::clone(&cancel);
            let busy = Arc::clone(&busy);
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if busy.load(Ordering::SeqCst) {
                        log::info!("interrupt: cancelling reply");
                        cancel.cancel();
                    } else {
                        std::process::exit(130);
                    }
                }
            });
        }

        let mut outcome = Ok(());
        match one_shot {
            Some(prompt) => {
                if !ask(&mut session, &prompt, &event_tx, &cancel, &busy).await {
                    outcome = Err(anyhow::anyhow!("turn failed"));
                }
            }
            None => {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                prompt_marker();
                while let Some(line) = lines.next_line().await? {
                    match line.trim() {
                        "" => {}
                        "/reset" => {
                            session.reset_history();
                            log::info!("history cleared");
                        }
                        prompt => {
                            // A failed turn is reported; the REPL keeps going.
                            ask(&mut session, prompt, &event_tx, &cancel, &busy).await;
                        }
                    }
                    prompt_marker();
                }
            }
        }

        drop(event_tx);
        let _ = printer.await;
        outcome
    });

    drop(rt);
    drop(session);
    result
}
