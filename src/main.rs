//! PDF Annotation CLI
//!
//! Command-line interface for inspecting, rendering, annotating and
//! compressing PDFs.

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use pdf_annotate::file_ops::{load_config, load_pdf_file, write_pdf_file};
use pdf_annotate::{
    parse_hex_color, CompressionSettings, EditorConfig, EditorError, EditorSession, FontFamily,
    PdfDocument, Position, RenderBackend, ToolKind,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Annotate PDF pages and flatten the result
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON editor configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show page count, page sizes and form fields
    Info {
        /// Input PDF file path
        input: PathBuf,
    },
    /// Rasterize a page to PNG
    Render {
        /// Input PDF file path
        input: PathBuf,
        /// Output PNG file path
        #[arg(short, long)]
        output: PathBuf,
        /// 1-based page number
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Zoom (pixels per point before the DPI multiplier)
        #[arg(short, long, default_value = "1.0")]
        scale: f32,
        /// Overrides the configured DPI multiplier
        #[arg(long)]
        dpi: Option<f32>,
    },
    /// Place annotations on a page and save the flattened PDF
    Annotate(AnnotateArgs),
    /// Compress the PDF structure and report the size change
    Compress {
        /// Input PDF file path
        input: PathBuf,
        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,
        /// Target size in KB
        #[arg(long, default_value = "100")]
        target_kb: u32,
        /// Quality 0-100
        #[arg(short, long, default_value = "90")]
        quality: u8,
    },
}

#[derive(ClapArgs, Debug)]
struct AnnotateArgs {
    /// Input PDF file path
    input: PathBuf,

    /// Output PDF file path (defaults to edited_<name> next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 1-based page number
    #[arg(short, long, default_value = "1")]
    page: u32,

    /// Text to place
    #[arg(short, long)]
    text: Option<String>,

    /// Text placement as X,Y in points from the top-left corner
    #[arg(long, value_parser = parse_position)]
    at: Option<Position>,

    /// Font family label, e.g. "Times New Roman"
    #[arg(long, default_value = "Arial")]
    font: String,

    /// Font size in points
    #[arg(long, default_value = "16")]
    size: f32,

    /// Text color as #RRGGBB
    #[arg(long, default_value = "#000000")]
    color: String,

    /// Signature image (PNG or JPEG)
    #[arg(long)]
    signature: Option<PathBuf>,

    /// Signature placement as X,Y
    #[arg(long, value_parser = parse_position)]
    signature_at: Option<Position>,

    /// Highlight stroke as X,Y;X,Y;...
    #[arg(long)]
    highlight: Option<String>,

    /// Highlight color as #RRGGBB
    #[arg(long, default_value = "#FFFF00")]
    highlight_color: String,
}

fn parse_position(value: &str) -> Result<Position, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got {:?}", value))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("bad X in {:?}: {}", value, e))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("bad Y in {:?}: {}", value, e))?;
    Ok(Position::new(x, y))
}

fn parse_stroke(value: &str) -> anyhow::Result<Vec<Position>> {
    value
        .split(';')
        .filter(|p| !p.trim().is_empty())
        .map(|p| parse_position(p).map_err(anyhow::Error::msg))
        .collect()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EditorConfig::default(),
    };

    match cli.command {
        Command::Info { input } => cmd_info(&input),
        Command::Render {
            input,
            output,
            page,
            scale,
            dpi,
        } => cmd_render(&input, &output, page, scale, dpi.unwrap_or(config.dpi_multiplier)),
        Command::Annotate(args) => cmd_annotate(args, config),
        Command::Compress {
            input,
            output,
            target_kb,
            quality,
        } => cmd_compress(&input, &output, target_kb, quality),
    }
}

fn cmd_info(input: &Path) -> anyhow::Result<()> {
    let document = load_pdf_file(input)?;

    println!("PDF Annotation Info");
    println!("===================");
    println!("File:  {}", document.name());
    println!("Size:  {} KB ({} bytes)", document.size_kb(), document.byte_size());
    println!("Pages: {}", document.page_count());

    let backend = document.render_backend();
    for number in 1..=document.page_count() {
        let page = backend.page(number)?;
        let size = page.size();
        let widgets = page.annotations().iter().filter(|a| a.is_widget()).count();
        println!(
            "  Page {}: {:.1} x {:.1} pt, {} form widgets",
            number, size.width, size.height, widgets
        );
    }

    let fields = document.form_fields();
    if fields.is_empty() {
        println!("No form fields detected");
    } else {
        println!("Form fields:");
        for field in fields {
            let required = if field.required { " (required)" } else { "" };
            println!("  {} [{:?}] = {:?}{}", field.name, field.field_type, field.value, required);
        }
    }
    Ok(())
}

fn cmd_render(input: &Path, output: &Path, page: u32, scale: f32, dpi: f32) -> anyhow::Result<()> {
    let document = load_pdf_file(input)?;
    let bitmap = document.rasterize(page, scale, dpi)?;
    let png = bitmap.encode_png()?;
    std::fs::write(output, png).with_context(|| format!("writing {:?}", output))?;

    let (w, h) = bitmap.pixel_size();
    println!("Rendered page {} at {}x{} px to {:?}", page, w, h, output);
    Ok(())
}

fn default_output(input: &Path, document: &PdfDocument) -> PathBuf {
    input.with_file_name(document.download_file_name())
}

fn cmd_annotate(args: AnnotateArgs, config: EditorConfig) -> anyhow::Result<()> {
    let document = load_pdf_file(&args.input)?;
    if args.page == 0 || args.page > document.page_count() {
        bail!(EditorError::PageIndex {
            page: args.page,
            total: document.page_count(),
        });
    }
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input, &document));

    let placement = config.placement;
    let mut session = EditorSession::open(document, config)?;
    session.go_to_page(args.page);

    if let Some(text) = &args.text {
        let font = FontFamily::from_label(&args.font)
            .with_context(|| format!("unknown font {:?}", args.font))?;
        let color = parse_hex_color(&args.color)
            .with_context(|| format!("bad color {:?}", args.color))?;
        session.toggle_tool(ToolKind::Text);
        if let Some(input) = session.tools_mut().text_mut() {
            input.text = text.clone();
            input.font = font;
            input.size = args.size;
            input.color = color;
        }
        let id = session.commit_tool_at(args.at.unwrap_or(placement))?;
        info!(?id, "text placed");
    }

    if let Some(path) = &args.signature {
        let bytes = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
        session.toggle_tool(ToolKind::Signature);
        if let Some(input) = session.tools_mut().signature_mut() {
            input.load_image(&bytes)?;
        }
        let id = session.commit_tool_at(args.signature_at.unwrap_or(placement))?;
        info!(?id, "signature placed");
    }

    if let Some(stroke) = &args.highlight {
        let points = parse_stroke(stroke)?;
        let color = parse_hex_color(&args.highlight_color)
            .with_context(|| format!("bad color {:?}", args.highlight_color))?;
        session.toggle_tool(ToolKind::Highlight);
        if let Some(input) = session.tools_mut().highlight_mut() {
            input.color = color;
            input.points = points;
        }
        let id = session.commit_tool_at(placement)?;
        info!(?id, "highlight placed");
    }

    let artifact = session.download()?;
    write_pdf_file(&output, &artifact.bytes)?;
    println!(
        "Saved {} annotations on page {} to {:?} ({} bytes)",
        session.surface().objects().len(),
        args.page,
        output,
        artifact.bytes.len()
    );
    Ok(())
}

fn cmd_compress(input: &Path, output: &Path, target_kb: u32, quality: u8) -> anyhow::Result<()> {
    let document = load_pdf_file(input)?;
    let settings = CompressionSettings {
        target_size_kb: target_kb,
        quality: quality as f32 / 100.0,
    };
    let (bytes, report) = pdf_annotate::compress_document(&document, &settings)?;
    write_pdf_file(output, &bytes)?;

    println!(
        "Compressed {} KB -> {} KB ({}% smaller){}",
        report.original_kb,
        report.compressed_kb,
        report.reduction_percent,
        if report.target_met { "" } else { ", target not reached" }
    );
    println!("Output saved to: {:?}", output);
    Ok(())
}
