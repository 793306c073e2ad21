use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_reader::audio::{samples_to_wav, sine_tone};
use beacon_reader::tts::backend::clamp_rate;
use beacon_reader::tts::chunking::DEFAULT_LIMIT;
use beacon_reader::{
    AudioSink, Backend, BackendKind, CommandSpeech, Config, PipelineState, Reader,
    ReaderOptions, Speaker, SystemSpeech, chunk_text,
};

/// Beacon Reader - read articles aloud
#[derive(Parser)]
#[command(name = "beacon-reader", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read articles aloud (stdin when no file is given)
    Read {
        /// Article files, read in order
        files: Vec<PathBuf>,

        /// Backend to use (system, local, cloud)
        #[arg(short, long, env = "BEACON_READER_BACKEND")]
        backend: Option<BackendKind>,

        /// Speech rate multiplier (0.25 to 4.0)
        #[arg(short, long)]
        rate: Option<f32>,

        /// Voice override
        #[arg(long)]
        voice: Option<String>,

        /// Maximum concurrent synthesis calls
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Print how text would be split into chunks
    Chunk {
        /// Text file (stdin when omitted)
        file: Option<PathBuf>,

        /// Soft chunk length bound in characters
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// List languages offered by the system speech engine
    Voices,
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_reader=info",
        1 => "info,beacon_reader=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Read {
            files,
            backend,
            rate,
            voice,
            concurrency,
        } => {
            let mut config = Config::load()?;
            if let Some(backend) = backend {
                config.backend = backend;
            }
            if let Some(rate) = rate {
                config.speech_rate = clamp_rate(rate);
            }
            if let Some(concurrency) = concurrency {
                config.fetch_concurrency = concurrency.max(1);
            }
            read(&config, &files, voice).await
        }
        Command::Chunk { file, limit } => {
            let text = read_input(file.as_ref())?;
            for chunk in chunk_text(&text, limit) {
                println!("[{}] ({} chars) {}", chunk.index, chunk.text.chars().count(), chunk.text);
            }
            Ok(())
        }
        Command::Voices => {
            let config = Config::load()?;
            let speech = CommandSpeech::new(config.system.command);
            for language in speech.available_languages().await? {
                println!("{language}");
            }
            Ok(())
        }
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Read articles aloud until done or interrupted
async fn read(config: &Config, files: &[PathBuf], voice: Option<String>) -> anyhow::Result<()> {
    let articles = if files.is_empty() {
        vec![read_input(None)?]
    } else {
        files
            .iter()
            .map(|path| read_input(Some(path)))
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let backend = Backend::from_config(config)?;
    let sink: Arc<dyn AudioSink> = Arc::new(Speaker::new()?);
    let mut options = ReaderOptions::from_config(config);
    if voice.is_some() {
        options.voice = voice;
    }

    tracing::info!(backend = backend.name(), articles = articles.len(), "reading");
    let handle = Reader::spawn(backend, sink, options);

    let mut progress = handle.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let text = progress.borrow_and_update().clone();
            if !text.is_empty() {
                eprintln!("reading {text}");
            }
        }
    });

    let mut notice = handle.notice();
    tokio::spawn(async move {
        while notice.changed().await.is_ok() {
            if let Some(message) = notice.borrow_and_update().clone() {
                eprintln!("{message}");
            }
        }
    });

    for article in articles {
        handle.submit(article)?;
    }
    handle.flush().await?;

    let mut state = handle.state();
    tokio::select! {
        done = async { state.wait_for(|s| *s == PipelineState::Idle).await.map(|_| ()) } => {
            done.context("reader stopped unexpectedly")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping");
            handle.stop()?;
            state
                .wait_for(|s| *s == PipelineState::Idle)
                .await
                .context("reader stopped unexpectedly")?;
        }
    }

    handle.shutdown()?;
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Test speaker output
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let speaker = Speaker::new()?;
    let sample_rate = speaker.sample_rate();
    let samples = sine_tone(440.0, 2.0, sample_rate);
    let wav = samples_to_wav(&samples, sample_rate)?;

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    speaker.play(&wav).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
