use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use renderengine::{GroupMode, StateKey};

#[derive(Parser, Debug)]
#[command(
    name = "renderctl",
    author,
    version,
    about = "Inspect the stereo composition engine without a display"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the synthesized vertex and fragment shaders for a feature combination.
    Shader(ShaderArgs),
    /// Prime a program cache against the recording driver and list its keys.
    Prime,
    /// Build the lens-warp mesh from a property file and summarize it.
    Warp(WarpArgs),
    /// Simulate one group frame and print the recorded driver commands.
    Frame(FrameArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TextureArg {
    #[default]
    Off,
    Ext,
    #[value(name = "2d")]
    Texture2d,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct ShaderArgs {
    /// Raw state key (e.g. `0x5d`); overrides every feature flag.
    #[arg(long, value_name = "BITS", value_parser = parse_key)]
    pub key: Option<StateKey>,

    /// Texture source sampled by the program.
    #[arg(long, value_enum, default_value_t = TextureArg::Off)]
    pub texture: TextureArg,

    #[arg(long)]
    pub premultiplied: bool,

    #[arg(long)]
    pub opaque: bool,

    /// Plane alpha below one.
    #[arg(long)]
    pub plane_alpha: bool,

    #[arg(long)]
    pub color_matrix: bool,

    /// Sample through the lens-warp coordinates.
    #[arg(long)]
    pub deform: bool,

    /// Sample each color channel at its own warp coordinate (requires `--deform`).
    #[arg(long)]
    pub dispersion: bool,
}

#[derive(Parser, Debug)]
pub struct WarpArgs {
    /// TOML file with a `[properties]` table; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    pub properties: Option<PathBuf>,

    /// Viewport the stereo group is begun with.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1440x2560")]
    pub viewport: (u32, u32),

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct FrameArgs {
    /// TOML file with a `[properties]` table; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    pub properties: Option<PathBuf>,

    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1440x2560")]
    pub viewport: (u32, u32),

    /// Group mode: 0 plain, 1 deform, 2 deform with color transform, 3 color transform.
    #[arg(long, value_name = "MODE", value_parser = parse_group_mode, default_value = "1")]
    pub mode: GroupMode,

    /// Also draw the layer into the right eye and composite from it.
    #[arg(long, conflicts_with = "mono")]
    pub right: bool,

    /// Use the single-target compositor instead of the stereo one.
    #[arg(long)]
    pub mono: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_key(value: &str) -> Result<StateKey, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("state key must not be empty".to_string());
    }

    let bits = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse(),
    }
    .map_err(|_| format!("invalid state key '{trimmed}'; use decimal or 0x-prefixed hex"))?;

    if bits > 0xff {
        return Err(format!("state key {bits:#x} has bits above 0xff"));
    }
    let key = StateKey::from_bits(bits);
    if !key.has_known_texture_field() {
        return Err(format!("state key {bits:#04x} uses the reserved texture field value 3"));
    }
    Ok(key)
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size '{trimmed}' must be non-zero"));
    }
    Ok((width, height))
}

pub fn parse_group_mode(value: &str) -> Result<GroupMode, String> {
    let raw: i32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid group mode '{value}'"))?;
    GroupMode::from_raw(raw).ok_or_else(|| format!("unknown group mode {raw}; expected 0-3"))
}
