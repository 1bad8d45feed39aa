// Run OCR and field extraction on a single image and print the result
use std::path::PathBuf;

use clap::Parser;
use idscan::processing::{FieldParser, TesseractExtractor, TextExtractor};
use idscan::utils::ScanError;

#[derive(Parser, Debug)]
#[command(name = "scan_file", about = "Extract ID fields from an image file")]
struct Args {
    image: PathBuf,

    #[arg(short, long, default_value = "eng")]
    language: String,

    /// Directory containing the Tesseract language data
    #[arg(long)]
    tessdata: Option<String>,

    /// Print the recognized text before the fields
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<(), ScanError> {
    let args = Args::parse();

    if !args.image.exists() {
        eprintln!("Image not found: {}", args.image.display());
        std::process::exit(1);
    }

    let extractor = TesseractExtractor::new(args.tessdata);
    let text = extractor.extract(&args.image, &args.language)?;

    if args.raw {
        println!("--- recognized text ---");
        println!("{}", text.trim_end());
        println!("-----------------------");
    }

    let data = FieldParser::parse(&text);
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
