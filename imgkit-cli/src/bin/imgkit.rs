use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use imgkit::{
    config::Config,
    fs::{walk, FileKind},
    manifest::{Platform, SchemaRegistry},
    storage::{ImageCloser, ImageOptions, StorageRegistry},
    Context,
};
use std::{fs, path::PathBuf};

#[derive(Debug, Parser)]
#[clap(version)]
struct Opt {
    /// Storage to read images from, `rootfs:///var/lib/docker` or `remote://`
    #[clap(short = 's', long = "storage", global = true, default_value = "rootfs:///")]
    storage: String,

    /// Platform as `os/arch[/variant]`, e.g. `linux/arm64/v8`
    #[clap(long = "platform", global = true)]
    platform: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show metadata of an image as JSON
    Inspect { reference: String },

    /// List layers of an image from the base layer
    Layers { reference: String },

    /// List files in a layer of an image
    Files {
        reference: String,
        /// Position of the layer, 0 is the base layer
        index: usize,
    },

    /// Decode a manifest file and show its references
    Manifest { input: PathBuf },
}

fn parse_platform(input: &str) -> Result<Platform> {
    let parts: Vec<&str> = input.split('/').collect();
    match parts.as_slice() {
        [os, arch] => Ok(Platform::new(os, arch, None)),
        [os, arch, variant] => Ok(Platform::new(os, arch, Some(*variant))),
        _ => bail!("Invalid platform `{}`, expected os/arch[/variant]", input),
    }
}

fn open_image(ctx: &Context, opt: &Opt, reference: &str) -> Result<Box<dyn ImageCloser>> {
    let config = Config::load()?;
    let registry = StorageRegistry::with_builtin(&config);
    let storage = registry
        .open(ctx, &opt.storage)
        .with_context(|| format!("Cannot open storage {}", opt.storage))?;
    let opts = ImageOptions {
        platform: opt.platform.as_deref().map(parse_platform).transpose()?,
    };
    Ok(storage.get_image(ctx, reference, &opts)?)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    let ctx = Context::new();

    match &opt.command {
        Command::Inspect { reference } => {
            let image = open_image(&ctx, &opt, reference)?;
            println!("{}", serde_json::to_string_pretty(image.metadata())?);
            image.close()?;
        }

        Command::Layers { reference } => {
            let image = open_image(&ctx, &opt, reference)?;
            println!("{} {}", "Image".green().bold(), image.metadata().id);
            for (i, layer) in image.layers(&ctx)?.iter().enumerate() {
                let metadata = layer.metadata();
                let diff_id = metadata
                    .diff_id
                    .as_ref()
                    .or(metadata.digest.as_ref())
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                println!("{:>3} {} {:>12}", i, diff_id, metadata.size);
                if let Some(created_by) = &metadata.created_by {
                    println!("    {}", created_by.dimmed());
                }
            }
            image.close()?;
        }

        Command::Files { reference, index } => {
            let image = open_image(&ctx, &opt, reference)?;
            let layers = image.layers(&ctx)?;
            let layer = match layers.get(*index) {
                Some(layer) => layer,
                None => bail!("Image has {} layers, no layer {}", layers.len(), index),
            };
            let layer_fs = layer.get_fs(&ctx)?;
            let entries = walk(&ctx, layer_fs.as_ref())?;
            for (i, (path, info)) in entries.iter().enumerate() {
                let branch = if i + 1 < entries.len() { "├─" } else { "└─" };
                let path = path.display().to_string();
                match info.kind {
                    FileKind::Dir => println!("  {} {}/", branch, path.blue().bold()),
                    FileKind::Symlink => println!("  {} {}", branch, path.cyan()),
                    _ if path.contains(".wh.") => println!("  {} {}", branch, path.red()),
                    _ => println!("  {} {}", branch, path),
                }
            }
            image.close()?;
        }

        Command::Manifest { input } => {
            let raw = fs::read(input).with_context(|| format!("Cannot read {}", input.display()))?;
            let (manifest, descriptor) = SchemaRegistry::with_builtin().parse_bytes(&raw)?;
            println!("{} {}", "MediaType".green().bold(), manifest.media_type());
            println!("{} {}", "Digest".green().bold(), descriptor.digest);
            for reference in manifest.references() {
                let platform = reference
                    .platform
                    .as_ref()
                    .map(|p| format!(" ({}/{})", p.os, p.architecture))
                    .unwrap_or_default();
                println!(
                    "  {} {} {}{}",
                    reference.digest, reference.size, reference.media_type, platform
                );
            }
        }
    }
    Ok(())
}
