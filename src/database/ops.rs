//! Store operations organized by record family

mod books;
mod load;
mod markers;
mod settings;
mod songs;
mod tags;
mod transfer;

pub use books::*;
pub use load::*;
pub use markers::*;
pub use settings::*;
pub use songs::*;
pub use tags::*;
pub use transfer::*;

use crate::error::{Error, Result};

/// Fresh opaque id, `<prefix>-<16 hex digits>`
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{:016x}", rand::random::<u64>())
}

/// Lowercase, dash-separated slug of a song title
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Marker times must lie in `[0, duration]`; an unknown duration only
/// bounds from below.
pub fn check_marker_time(time: f64, duration: Option<f64>) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(Error::constraint(format!(
            "marker time {time} must be a non-negative number of seconds"
        )));
    }
    if let Some(duration) = duration {
        if time > duration {
            return Err(Error::constraint(format!(
                "marker time {time} is past the end of the song ({duration}s)"
            )));
        }
    }
    Ok(())
}

fn check_duration(duration: Option<f64>) -> Result<()> {
    match duration {
        Some(d) if !d.is_finite() || d < 0.0 => Err(Error::constraint(format!(
            "song duration {d} must be a non-negative number of seconds"
        ))),
        _ => Ok(()),
    }
}

fn check_tempo(tempo: Option<f64>) -> Result<()> {
    match tempo {
        Some(t) if !t.is_finite() || t <= 0.0 => {
            Err(Error::constraint(format!("tempo {t} must be positive")))
        }
        _ => Ok(()),
    }
}
