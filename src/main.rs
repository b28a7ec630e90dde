use anyhow::Result;
use clap::{Parser, Subcommand};
use media_cdn_sync::app::App;
use media_cdn_sync::key::derive_key;
use media_cdn_sync::manifest::PublishManifest;
use media_cdn_sync::models::{parse_sites, Config, MediaAsset};
use media_cdn_sync::rewriter::{MediaUrlRewriter, RequestContext};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "media-cdn-sync")]
#[command(about = "Synchronize published media assets with a CDN object store")]
struct CliArgs {
    /// Use an in-memory store instead of the configured bucket.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a publish manifest against the store.
    Replay {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
    /// Create the container and apply its public-read policy.
    EnsureContainer,
    /// Print the storage key derived for a media item.
    Key {
        #[arg(long)]
        path: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "")]
        extension: String,
    },
    /// Rewrite a media delivery URL to go through the CDN origin.
    RewriteUrl {
        url: String,
        #[arg(long)]
        revision: String,
        #[arg(long)]
        site: String,
        #[arg(long, default_value = "web")]
        database: String,
        #[arg(long, env = "CDN_ORIGIN_PREFIX")]
        origin_prefix: Option<String>,
        #[arg(long, env = "CDN_SITES", default_value = "")]
        sites: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_cdn_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    match run(args).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but reported failures.
async fn run(args: CliArgs) -> Result<bool> {
    match args.command {
        Command::Replay { manifest } => {
            let config = Config::from_env()?;
            let manifest = PublishManifest::load(&manifest)?;
            let app = App::new(&config, args.dry_run).await?;

            info!("Replaying {} publish events", manifest.events.len());
            let summary = app.replay(&manifest).await;
            for failure in &summary.failures {
                error!("{}", failure);
            }
            Ok(summary.is_success())
        }
        Command::EnsureContainer => {
            let config = Config::from_env()?;
            App::new(&config, args.dry_run).await?;
            info!("Container {} is ready", config.container_name);
            Ok(true)
        }
        Command::Key {
            path,
            name,
            display_name,
            extension,
        } => {
            let display_name = display_name.unwrap_or_else(|| name.clone());
            let asset = MediaAsset::new("cli", path, name).with_display_name(display_name);
            println!("{}", derive_key(&asset, &extension));
            Ok(true)
        }
        Command::RewriteUrl {
            url,
            revision,
            site,
            database,
            origin_prefix,
            sites,
        } => {
            let rewriter = MediaUrlRewriter::new(origin_prefix, parse_sites(&sites));
            let asset = MediaAsset::new("cli", "", "").with_revision(revision);
            let context = RequestContext {
                site: &site,
                database: &database,
            };
            println!("{}", rewriter.rewrite(&url, &asset, &context));
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay_with_dry_run() {
        let args = CliArgs::try_parse_from(["media-cdn-sync", "replay", "run.json", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert!(matches!(args.command, Command::Replay { manifest } if manifest == PathBuf::from("run.json")));
    }

    #[test]
    fn test_parse_key_defaults() {
        let args = CliArgs::try_parse_from([
            "media-cdn-sync",
            "key",
            "--path",
            "/Images/Logo",
            "--name",
            "Logo",
        ])
        .unwrap();
        match args.command {
            Command::Key {
                display_name,
                extension,
                ..
            } => {
                assert!(display_name.is_none());
                assert_eq!(extension, "");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rewrite_url_requires_revision() {
        let result = CliArgs::try_parse_from([
            "media-cdn-sync",
            "rewrite-url",
            "https://site/-/media/a.jpg",
            "--site",
            "website",
        ]);
        assert!(result.is_err());
    }
}
