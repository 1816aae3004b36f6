//! Command-line front end for signature placement
//!
//! Runs the same pipeline as the browser session against files on disk:
//! validate, matte, map a preview placement to page space, composite.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pdfsign_core::validation::{validate_pdf, validate_upload, PDF_MIME};
use pdfsign_core::{
    composite_signature, map_placement, matte_png, PageGeometry, Placement, PreviewRasterizer,
    PreviewRect, Rasterizer, SignConfig, SignatureBitmap,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pdfsign")]
#[command(version, about = "Place a signature image on a PDF page")]
struct Args {
    /// JSON configuration file; PDFSIGN_* environment variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print document info and page geometry as JSON
    Info { pdf: PathBuf },

    /// Make the light background of a signature image transparent
    Matte {
        image: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Channel threshold; pixels brighter than this on average become transparent
        #[arg(long)]
        threshold: Option<u8>,
    },

    /// Composite a signature onto one page
    Sign {
        pdf: PathBuf,
        #[arg(long)]
        signature: PathBuf,
        /// Zero-based page index
        #[arg(long, default_value = "0")]
        page: usize,
        /// Left edge of the signature on the preview, in preview pixels
        #[arg(long)]
        x: f64,
        /// Top edge of the signature on the preview, in preview pixels
        #[arg(long)]
        y: f64,
        #[arg(long, default_value = "1.0")]
        scale: f64,
        /// Preview width; defaults to the page width in points
        #[arg(long)]
        preview_width: Option<f64>,
        /// Preview height; defaults to the page height in points
        #[arg(long)]
        preview_height: Option<f64>,
        #[arg(long)]
        threshold: Option<u8>,
        /// Output path; defaults to signed_<name> next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rasterize every page to PNG for placement checks
    ///
    /// Only filled shapes and images are drawn; text does not appear.
    Render {
        pdf: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
}

#[derive(Serialize)]
struct InfoReport {
    #[serde(flatten)]
    info: pdfsign_core::validation::PdfInfo,
    pages: Vec<PageGeometry>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Keep stdout for command output
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(args.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match args.command {
        Command::Info { pdf } => info(&pdf),
        Command::Matte {
            image,
            output,
            threshold,
        } => matte(&image, &output, threshold.unwrap_or(config.default_threshold)),
        Command::Sign {
            pdf,
            signature,
            page,
            x,
            y,
            scale,
            preview_width,
            preview_height,
            threshold,
            output,
        } => {
            let request = SignRequest {
                page_index: page,
                x,
                y,
                scale,
                preview_size: preview_width.zip(preview_height),
                threshold: threshold.unwrap_or(config.default_threshold),
            };
            sign(&config, &pdf, &signature, &request, output)
        }
        Command::Render { pdf, out_dir } => render(&config, &pdf, &out_dir),
    }
}

fn load_config(path: Option<&Path>) -> Result<SignConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            SignConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))
        }
        None => Ok(SignConfig::from_env()),
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn info(pdf: &Path) -> Result<()> {
    let (doc, info) = validate_pdf(&read(pdf)?)?;
    let pages = PageGeometry::all_from_document(&doc)?;
    let report = InfoReport { info, pages };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn matte(image: &Path, output: &Path, threshold: u8) -> Result<()> {
    let png = matte_png(&read(image)?, threshold)?;
    write(output, &png)?;
    tracing::info!(output = %output.display(), threshold, "matted signature written");
    Ok(())
}

/// Placement given on the command line
#[derive(Debug, Clone, PartialEq)]
struct SignRequest {
    page_index: usize,
    x: f64,
    y: f64,
    scale: f64,
    preview_size: Option<(f64, f64)>,
    threshold: u8,
}

fn sign(
    config: &SignConfig,
    pdf: &Path,
    signature: &Path,
    request: &SignRequest,
    output: Option<PathBuf>,
) -> Result<()> {
    let bytes = read(pdf)?;
    let (doc, info) = validate_upload(PDF_MIME, &bytes, config)?;
    let page = PageGeometry::from_document(&doc, request.page_index)?;

    let signature = SignatureBitmap::uploaded(
        image_mime(signature),
        &read(signature)?,
        request.threshold,
    )?;

    let (preview_width, preview_height) =
        request.preview_size.unwrap_or((page.width, page.height));
    let preview = PreviewRect::new(preview_width, preview_height);
    if request.scale < config.min_scale || request.scale > config.max_scale {
        bail!(
            "Scale {} is outside {}..={}",
            request.scale,
            config.min_scale,
            config.max_scale
        );
    }
    let placement = Placement {
        x: request.x,
        y: request.y,
        scale: request.scale,
        page_index: request.page_index,
    };
    let rect = map_placement(&preview, &page, &placement, config)?;

    let signed = composite_signature(&bytes, signature.image(), request.page_index, &rect)?;
    let output = output.unwrap_or_else(|| signed_path(pdf));
    write(&output, &signed)?;
    tracing::info!(
        output = %output.display(),
        pages = info.page_count,
        page_index = request.page_index,
        "signed document written"
    );
    Ok(())
}

/// Text-free page bitmaps, written one page at a time
fn render(config: &SignConfig, pdf: &Path, out_dir: &Path) -> Result<()> {
    let (doc, info) = validate_pdf(&read(pdf)?)?;
    let rasterizer = PreviewRasterizer::from_config(config);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for page_index in 0..info.page_count {
        let bitmap = rasterizer.rasterize_page(&doc, page_index)?;
        let path = out_dir.join(format!("page-{}.png", page_index + 1));
        write(&path, &bitmap.to_png()?)?;
    }
    tracing::info!(pages = info.page_count, out_dir = %out_dir.display(), "pages rendered");
    Ok(())
}

/// MIME type guessed from the file extension
fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// `signed_<name>` in the input's directory
fn signed_path(pdf: &Path) -> PathBuf {
    let name = pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    pdf.with_file_name(format!("signed_{}", name))
}
