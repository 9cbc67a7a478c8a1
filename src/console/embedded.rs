use rust_embed::RustEmbed;

/// Dashboard pages and scripts, compiled into the binary.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/public/"]
pub struct Assets;
