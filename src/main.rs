//! # wardrobe-ingest CLI
//!
//! Command-line interface for the wardrobe catalog.
//!
//! ## Usage
//! ```bash
//! wardrobe-ingest ingest https://cdn.example.com/upload.jpg --owner user-1
//! wardrobe-ingest fingerprint ./photo.jpg --grid 8
//! ```

mod cli;

use wardrobe_catalog::Result;

fn main() -> Result<()> {
    wardrobe_catalog::init_tracing();
    cli::run()
}
