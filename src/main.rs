use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use talklens::analysis::{format_transcript_with_speakers, AnalysisClient};
use talklens::config::Config;
use talklens::transcription::{TranscribeOptions, TranscriptionClient};

/// Transcribe and analyze audio recordings from the command line
#[derive(Parser, Debug)]
#[command(name = "talklens", version, about)]
struct Cli {
    /// Audio files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Language of the audio (name or ISO code)
    #[arg(short, long)]
    language: Option<String>,

    /// Translate the output to English
    #[arg(short, long)]
    translate: bool,

    /// Context prompt passed to the transcription API
    #[arg(short, long)]
    prompt: Option<String>,

    /// Extra context for the analysis report
    #[arg(short, long)]
    context: Option<String>,

    /// Skip the analysis step, produce only transcripts
    #[arg(long)]
    skip_analysis: bool,

    /// Output directory (defaults to next to each input file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "talklens=debug,info" } else { "talklens=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::from_env()
    });
    config.validate()?;

    let mut options = TranscribeOptions {
        language: cli.language.unwrap_or_else(|| config.pipeline.language.clone()),
        translate: cli.translate,
        speaker_labels: config.pipeline.speaker_labels,
        ..TranscribeOptions::default()
    };
    options.prompt = cli.prompt;

    let transcriber = TranscriptionClient::new(config.transcription.clone())?;
    let analyzer = if cli.skip_analysis {
        None
    } else {
        Some(AnalysisClient::new(config.analysis.clone())?)
    };

    info!("🚀 TalkLens starting: {} file(s)", cli.files.len());

    let mut failed = 0usize;
    for file in &cli.files {
        if let Err(e) = process_file(
            file,
            &options,
            cli.context.as_deref(),
            cli.output_dir.as_deref(),
            &transcriber,
            analyzer.as_ref(),
        )
        .await
        {
            error!("❌ {}: {:#}", file.display(), e);
            failed += 1;
        }
    }

    let successful = cli.files.len() - failed;
    info!("🎉 Done: {} succeeded, {} failed", successful, failed);
    if failed > 0 {
        anyhow::bail!("{} file(s) failed", failed);
    }
    Ok(())
}

async fn process_file(
    file: &Path,
    options: &TranscribeOptions,
    context: Option<&str>,
    output_dir: Option<&Path>,
    transcriber: &TranscriptionClient,
    analyzer: Option<&AnalysisClient>,
) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("input path has no usable filename")?
        .to_string();

    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("could not read {}", file.display()))?;

    let result = transcriber.transcribe(&content, &filename, options).await?;
    let transcript = format_transcript_with_speakers(&result.text, &result.segments);

    let out_base = match output_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            dir.join(file.file_stem().unwrap_or_default())
        }
        None => file.with_extension(""),
    };

    let transcript_path = out_base.with_extension("txt");
    tokio::fs::write(&transcript_path, &transcript).await?;
    info!("📝 Transcript written to {}", transcript_path.display());

    if let Some(analyzer) = analyzer {
        let language = result.language.as_deref().unwrap_or(&options.language);
        let report = analyzer
            .analyze(&transcript, &filename, context, language)
            .await?;

        let report_path = out_base.with_extension("html");
        tokio::fs::write(&report_path, &report).await?;
        info!("📊 Report written to {}", report_path.display());
    }

    Ok(())
}
