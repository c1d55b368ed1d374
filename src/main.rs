use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voiceloop::agent::ChatService;
use voiceloop::conversation::{ConversationEngine, ConversationEvent};
use voiceloop::voice::{
    AudioCapture, AudioPlayback, Backend, HostCommand, HostEvent, HostEvents, SpeechStack,
    VoiceSelector, build_tts, calculate_energy, decode_mp3, normalize, test_tone,
};
use voiceloop::Config;

/// voiceloop - Turn-based voice conversations with an AI assistant
#[derive(Parser)]
#[command(name = "voiceloop", version, about)]
struct Cli {
    /// Speech backend ("device" or "hosted")
    #[arg(short, long, env = "VOICELOOP_BACKEND")]
    backend: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Talk with the assistant through the microphone and speakers
    Converse {
        /// Session identifier (random when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Run a hosted conversation bridged over stdin/stdout as JSON lines
    Host {
        /// Session identifier (random when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// List synthesis voices and the default pick
    Voices,
    /// Print text the way it would be spoken
    Normalize {
        /// Text to normalize
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voiceloop=info",
        1 => "info,voiceloop=debug",
        2 => "debug",
        _ => "trace",
    };

    // stdout is reserved for conversation output and the host protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(name) = &cli.backend {
        config.backend = Backend::from_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown backend: {name}"))?;
    }

    match cli.command.unwrap_or(Command::Converse { session: None }) {
        Command::Converse { session } => converse(config, session).await,
        Command::Host { session } => host(config, session).await,
        Command::Voices => list_voices(&config).await,
        Command::Normalize { text } => {
            println!("{}", normalize(&text));
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

fn session_or_random(session: Option<String>) -> String {
    session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn build_engine(config: &Config, stack: &SpeechStack) -> ConversationEngine {
    let replies = ChatService::new(&config.chat, config.chat_api_key());
    ConversationEngine::new(
        Arc::clone(&stack.recognizer),
        Arc::clone(&stack.synthesizer),
        Arc::new(replies),
        config.engine_settings(),
    )
}

/// Run a conversation on the local microphone and speakers
async fn converse(config: Config, session: Option<String>) -> anyhow::Result<()> {
    if config.backend == Backend::Hosted {
        anyhow::bail!("the hosted backend needs a host; run `voiceloop host` instead");
    }

    let stack = SpeechStack::build(Backend::Device, &config)?;
    let engine = build_engine(&config, &stack);
    engine.initialize().await?;
    // Launching from a terminal counts as the user's gesture
    engine.note_user_interaction();

    if let Some(voice) = engine.current_voice() {
        tracing::info!(voice = %voice.name, "speaking voice");
    }

    let (events_tx, mut events) = mpsc::unbounded_channel();
    engine
        .start_conversation(session_or_random(session), Arc::new(events_tx))
        .await?;

    println!("Listening. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let ended = event == ConversationEvent::ConversationEnd;
                print_event(&event);
                if ended {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    engine.stop_conversation().await;
    Ok(())
}

fn print_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::Listening => println!("[listening]"),
        ConversationEvent::Results { transcripts } => println!("you: {}", transcripts.join(" ")),
        ConversationEvent::AiThinking => println!("[thinking]"),
        ConversationEvent::AiResponse { reply, .. } => println!("assistant: {reply}"),
        ConversationEvent::Error { reason } => println!("[error] {reason}"),
        ConversationEvent::ConversationEnd => println!("[conversation ended]"),
        ConversationEvent::SpeechStart
        | ConversationEvent::SpeechEnd
        | ConversationEvent::AiSpeaking => {
            tracing::debug!(?event, "conversation event");
        }
    }
}

/// Line written to stdout in host mode
#[derive(Serialize)]
#[serde(tag = "channel", content = "message", rename_all = "camelCase")]
enum Outbound {
    Command(HostCommand),
    Conversation(ConversationEvent),
}

/// Control line read from stdin in host mode
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Control {
    UserInteraction,
    Stop,
}

fn emit_line(message: &Outbound) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to encode outbound line"),
    }
}

/// Feed stdin lines to the bridge or the control channel
async fn read_host_input(events: HostEvents, control: mpsc::UnboundedSender<Control>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<HostEvent>(line) {
                    events.deliver(event);
                } else if let Ok(message) = serde_json::from_str::<Control>(line) {
                    control.send(message).ok();
                } else {
                    tracing::warn!(line, "unrecognized host input");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read host input");
                break;
            }
        }
    }
    control.send(Control::Stop).ok();
}

/// Run a conversation whose speech capabilities live in a host process
async fn host(config: Config, session: Option<String>) -> anyhow::Result<()> {
    let mut stack = SpeechStack::build(Backend::Hosted, &config)?;
    let link = stack
        .host_link
        .take()
        .ok_or_else(|| anyhow::anyhow!("hosted backend has no host link"))?;
    let mut commands = link.commands;

    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            emit_line(&Outbound::Command(command));
        }
    });

    let (control_tx, mut control) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_host_input(link.events, control_tx));

    let engine = build_engine(&config, &stack);
    engine.initialize().await?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    engine
        .start_conversation(session_or_random(session), Arc::new(events_tx))
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let ended = event == ConversationEvent::ConversationEnd;
                emit_line(&Outbound::Conversation(event));
                if ended {
                    break;
                }
            }
            message = control.recv() => match message {
                Some(Control::UserInteraction) => engine.note_user_interaction(),
                Some(Control::Stop) | None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.stop_conversation().await;
    while let Ok(event) = events.try_recv() {
        emit_line(&Outbound::Conversation(event));
    }

    reader.abort();
    drop(engine);
    drop(stack);
    // Let queued commands (the final stop/cancel) reach stdout
    tokio::time::timeout(Duration::from_millis(200), writer).await.ok();
    Ok(())
}

/// List voices for the device backend
async fn list_voices(config: &Config) -> anyhow::Result<()> {
    let tts = build_tts(config)?;
    let voices = tts.list_voices().await?;
    let settings = config.engine_settings();
    let picked = settings.selector.pick_default(&voices);

    for voice in &voices {
        let marker = if picked.is_some_and(|p| p.id == voice.id) {
            "*"
        } else {
            " "
        };
        let gender = voice
            .gender
            .map_or_else(|| "-".to_string(), |g| format!("{g:?}").to_lowercase());
        println!(
            "{marker} {:<24} {:<8} {:<7} {}",
            voice.name, voice.language, gender, voice.id
        );
    }

    println!("\nProvider default: {}", tts.default_voice());
    if let Some(name) = &config.speech.voice {
        match VoiceSelector::find(&voices, name) {
            Some(voice) => println!("Configured voice: {}", voice.name),
            None => println!("Configured voice {name:?} is not available"),
        }
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (samples_tx, mut samples) = mpsc::unbounded_channel::<Vec<f32>>();
    let mut capture = tokio::task::spawn_blocking(move || AudioCapture::start(samples_tx)).await??;

    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut second = Vec::new();
        while let Ok(chunk) = samples.try_recv() {
            second.extend(chunk);
        }
        let energy = calculate_energy(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let samples = test_tone(440.0, Duration::from_secs(2));
    play(samples, 1.0).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    let spoken = normalize(text);
    println!("Testing TTS with text: \"{spoken}\"\n");

    let tts = build_tts(config)?;

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(&spoken, None, config.speech.rate).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    let samples = decode_mp3(&mp3_data)?;
    println!("Playing audio...");
    play(samples, config.speech.volume).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

async fn play(samples: Vec<f32>, volume: f32) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new()?;
        let cancel = std::sync::atomic::AtomicBool::new(false);
        playback.play_blocking(samples, volume, &cancel, || {})
    })
    .await??;
    Ok(())
}
