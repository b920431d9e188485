use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use smithay::utils::{Logical, Point, Transform};

use crate::{CompositorError, message::MessageStyle, output::Subpixel};

const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub background: [f32; 4],
    /// Zero keeps messages up until cleared explicitly.
    pub message_timeout: Duration,
    pub message_style: MessageStyle,
    pub debug_damage_tracking: bool,
    pub workspaces: usize,
    pub outputs: Vec<OutputConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            background: [0.25, 0.25, 0.25, 1.0],
            message_timeout: Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS),
            message_style: MessageStyle::default(),
            debug_damage_tracking: false,
            workspaces: 1,
            outputs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputConfig {
    pub name: String,
    pub width: i32,
    pub height: i32,
    /// mHz.
    pub refresh: i32,
    pub scale: f64,
    pub transform: Transform,
    pub subpixel: Subpixel,
    pub position: Point<i32, Logical>,
}

pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: RuntimeConfig,
}

pub(crate) fn env_truthy(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let value = value.trim().to_ascii_lowercase();
    Some(matches!(value.as_str(), "1" | "true" | "yes" | "on"))
}

pub fn load_or_create_default() -> Result<LoadedConfig, CompositorError> {
    let path = config_path()?;
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                CompositorError::Config(format!(
                    "failed to create config directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        fs::write(&path, default_config_template()).map_err(|err| {
            CompositorError::Config(format!(
                "failed to write default config {}: {err}",
                path.display()
            ))
        })?;
        tracing::info!(path = %path.display(), "created default config");
    }

    let config = load_from_path(&path)?;
    Ok(LoadedConfig { path, config })
}

pub fn load_from_path(path: &Path) -> Result<RuntimeConfig, CompositorError> {
    let content = fs::read_to_string(path).map_err(|err| {
        CompositorError::Config(format!("failed to read config {}: {err}", path.display()))
    })?;
    let mut config = parse_config_str(&content)?;
    apply_environment(&mut config);
    tracing::debug!(
        path = %path.display(),
        outputs = config.outputs.len(),
        debug_damage_tracking = config.debug_damage_tracking,
        "config loaded"
    );
    Ok(config)
}

/// Environment overrides that win over the file.
pub fn apply_environment(config: &mut RuntimeConfig) {
    if let Some(debug) = env_truthy("CLEAVE_DEBUG_DAMAGE") {
        config.debug_damage_tracking = debug;
    }
}

pub fn parse_config_str(content: &str) -> Result<RuntimeConfig, CompositorError> {
    let values = parse_key_values(content)?;
    let defaults = RuntimeConfig::default();

    let background = match values.get("background") {
        Some(raw) => parse_color(raw, "background")?,
        None => defaults.background,
    };
    let message_timeout = Duration::from_millis(parse_u64(
        &values,
        "message_timeout_ms",
        DEFAULT_MESSAGE_TIMEOUT_MS,
    )?);

    let mut message_style = defaults.message_style;
    if let Some(font) = values.get("message_font").map(|raw| raw.trim())
        && !font.is_empty()
    {
        message_style.font = font.to_owned();
    }

    let workspaces = parse_u64(&values, "workspaces", defaults.workspaces as u64)?;
    if workspaces == 0 {
        return Err(CompositorError::Config(
            "invalid value for workspaces: 0 (must be at least 1)".to_owned(),
        ));
    }

    Ok(RuntimeConfig {
        background,
        message_timeout,
        message_style,
        debug_damage_tracking: parse_bool_flexible(
            &values,
            "debug_damage_tracking",
            defaults.debug_damage_tracking,
        )?,
        workspaces: workspaces as usize,
        outputs: parse_output_configs(&values)?,
    })
}

fn config_path() -> Result<PathBuf, CompositorError> {
    if let Some(path) = std::env::var_os("CLEAVE_CONFIG")
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join("cleave").join("config"));
    }

    if let Some(home) = std::env::var_os("HOME")
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home)
            .join(".config")
            .join("cleave")
            .join("config"));
    }

    Err(CompositorError::Config(
        "unable to resolve config path: HOME and XDG_CONFIG_HOME are unset".to_owned(),
    ))
}

fn parse_key_values(content: &str) -> Result<HashMap<String, String>, CompositorError> {
    let mut values = HashMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CompositorError::Config(format!(
                "line {}: expected `key = value`, got `{line}`",
                number + 1
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CompositorError::Config(format!(
                "line {}: missing key",
                number + 1
            )));
        }
        values.insert(key.to_owned(), value.trim().to_owned());
    }
    Ok(values)
}

fn parse_output_configs(
    values: &HashMap<String, String>,
) -> Result<Vec<OutputConfig>, CompositorError> {
    let mut grouped = BTreeMap::<usize, HashMap<String, String>>::new();

    for (key, value) in values {
        let Some(rest) = key.strip_prefix("output.") else {
            continue;
        };
        let Some((raw_index, field)) = rest.split_once('.') else {
            return Err(CompositorError::Config(format!(
                "invalid output key `{key}`: expected format output.<index>.<field>"
            )));
        };
        if field.trim().is_empty() {
            return Err(CompositorError::Config(format!(
                "invalid output key `{key}`: missing field"
            )));
        }
        let index = raw_index.parse::<usize>().map_err(|err| {
            CompositorError::Config(format!(
                "invalid output key `{key}`: index is not a number ({err})"
            ))
        })?;
        grouped
            .entry(index)
            .or_default()
            .insert(field.trim().to_owned(), value.clone());
    }

    let mut outputs = Vec::with_capacity(grouped.len());
    let mut next_x = 0;
    for (index, fields) in grouped {
        let name = fields
            .get("name")
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HEADLESS-{}", index + 1));

        let (width, height, refresh) = match fields.get("mode") {
            Some(raw) => parse_output_mode(raw, &format!("output.{index}.mode"))?,
            None => (1280, 720, 60_000),
        };

        let scale_key = format!("output.{index}.scale");
        let scale = match fields.get("scale") {
            Some(raw) => parse_f64(raw, &scale_key)?,
            None => 1.0,
        };
        if scale <= 0.0 {
            return Err(CompositorError::Config(format!(
                "invalid value for {scale_key}: {scale} (must be greater than 0)"
            )));
        }

        let transform = fields
            .get("transform")
            .map(|raw| parse_transform(raw))
            .unwrap_or(Transform::Normal);
        let subpixel = match fields.get("subpixel") {
            Some(raw) => parse_subpixel(raw, &format!("output.{index}.subpixel"))?,
            None => Subpixel::Unknown,
        };

        let x = match fields.get("x") {
            Some(raw) => parse_i32(raw, &format!("output.{index}.x"))?,
            None => next_x,
        };
        let y = match fields.get("y") {
            Some(raw) => parse_i32(raw, &format!("output.{index}.y"))?,
            None => 0,
        };
        let logical_width = if matches!(
            transform,
            Transform::_90 | Transform::_270 | Transform::Flipped90 | Transform::Flipped270
        ) {
            height
        } else {
            width
        };
        next_x = x + (logical_width as f64 / scale) as i32;

        outputs.push(OutputConfig {
            name,
            width,
            height,
            refresh,
            scale,
            transform,
            subpixel,
            position: Point::from((x, y)),
        });
    }

    Ok(outputs)
}

/// `WxH` or `WxH@Hz`, returning the refresh in mHz.
fn parse_output_mode(raw: &str, key: &str) -> Result<(i32, i32, i32), CompositorError> {
    let mode = raw.trim();
    let (size_part, refresh_part) = match mode.split_once('@') {
        Some((size, refresh)) => (size.trim(), Some(refresh.trim())),
        None => (mode, None),
    };

    let (width, height) = size_part
        .split_once('x')
        .or_else(|| size_part.split_once('X'))
        .ok_or_else(|| {
            CompositorError::Config(format!(
                "invalid value for {key}: {raw} (expected `<width>x<height>[@<refresh>]`)"
            ))
        })?;
    let width = parse_i32(width.trim(), key)?;
    let height = parse_i32(height.trim(), key)?;
    if width <= 0 || height <= 0 {
        return Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (size must be positive)"
        )));
    }

    let refresh = match refresh_part {
        Some(raw_refresh) => {
            let hz = parse_f64(raw_refresh, key)?;
            if hz <= 0.0 {
                return Err(CompositorError::Config(format!(
                    "invalid value for {key}: {raw} (refresh must be greater than 0)"
                )));
            }
            (hz * 1000.0).round() as i32
        }
        None => 60_000,
    };

    Ok((width, height, refresh))
}

pub fn parse_transform(raw: &str) -> Transform {
    match raw.trim().to_ascii_lowercase().as_str() {
        "normal" | "0" => Transform::Normal,
        "90" => Transform::_90,
        "180" => Transform::_180,
        "270" => Transform::_270,
        "flipped" => Transform::Flipped,
        "flipped90" | "flipped-90" => Transform::Flipped90,
        "flipped180" | "flipped-180" => Transform::Flipped180,
        "flipped270" | "flipped-270" => Transform::Flipped270,
        other => {
            tracing::warn!(transform = other, "unknown output transform, using normal");
            Transform::Normal
        }
    }
}

fn parse_subpixel(raw: &str, key: &str) -> Result<Subpixel, CompositorError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "unknown" => Ok(Subpixel::Unknown),
        "none" => Ok(Subpixel::None),
        "rgb" => Ok(Subpixel::HorizontalRgb),
        "bgr" => Ok(Subpixel::HorizontalBgr),
        "vrgb" => Ok(Subpixel::VerticalRgb),
        "vbgr" => Ok(Subpixel::VerticalBgr),
        _ => Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (expected unknown, none, rgb, bgr, vrgb or vbgr)"
        ))),
    }
}

/// `r, g, b` or `r, g, b, a`, each in `0.0..=1.0`.
fn parse_color(raw: &str, key: &str) -> Result<[f32; 4], CompositorError> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (expected `r, g, b[, a]`)"
        )));
    }

    let mut color = [0.0, 0.0, 0.0, 1.0];
    for (slot, part) in color.iter_mut().zip(&parts) {
        let value = part.parse::<f32>().map_err(|err| {
            CompositorError::Config(format!("invalid value for {key}: {raw} ({err})"))
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(CompositorError::Config(format!(
                "invalid value for {key}: {raw} (components must be within 0..1)"
            )));
        }
        *slot = value;
    }
    Ok(color)
}

fn parse_i32(raw: &str, key: &str) -> Result<i32, CompositorError> {
    raw.trim().parse::<i32>().map_err(|err| {
        CompositorError::Config(format!("invalid value for {key}: {raw} ({err})"))
    })
}

fn parse_f64(raw: &str, key: &str) -> Result<f64, CompositorError> {
    let value = raw.trim().parse::<f64>().map_err(|err| {
        CompositorError::Config(format!("invalid value for {key}: {raw} ({err})"))
    })?;
    if !value.is_finite() {
        return Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (must be finite)"
        )));
    }
    Ok(value)
}

fn parse_u64(
    values: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, CompositorError> {
    match values.get(key) {
        Some(raw) => raw.parse::<u64>().map_err(|err| {
            CompositorError::Config(format!("invalid value for {key}: {raw} ({err})"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_flexible(
    values: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, CompositorError> {
    let Some(raw) = values.get(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (expected bool or 0/1)"
        ))),
    }
}

fn default_config_template() -> &'static str {
    r#"# cleave config
# File: ~/.config/cleave/config (or $XDG_CONFIG_HOME/cleave/config)

# Background colour as r, g, b[, a].
background = 0.25, 0.25, 0.25, 1.0

# How long messages stay on screen. 0 keeps them until cleared.
message_timeout_ms = 2000
message_font = Monospace 10

# Flash the whole output red under each frame's damage.
debug_damage_tracking = false

workspaces = 1

# One block per output. Outputs without x are placed left to right.
output.0.name = HEADLESS-1
output.0.mode = 1280x720@60
output.0.scale = 1
output.0.transform = normal
output.0.subpixel = unknown
"#
}
