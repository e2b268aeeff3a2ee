//! Settings singleton

use futures_util::FutureExt;
use tracing::{info, warn};

use crate::database::store::{Mode, Store};
use crate::database::{Collection, Settings};
use crate::error::{Error, Result};

/// Id of the settings record in the `settings` collection
pub const SETTINGS_KEY: &str = "settings";

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if let Some(bad) = settings.skip_times.iter().find(|t| !t.is_finite()) {
        return Err(Error::constraint(format!("skip time {bad} is not a number")));
    }
    let adjustment = settings.marker_time_adjustment;
    if !adjustment.is_finite() || adjustment < 0.0 {
        return Err(Error::constraint(format!(
            "marker time adjustment {adjustment} must be non-negative"
        )));
    }
    Ok(())
}

/// Stored settings; defaults are written on first run and replace an
/// unreadable record
pub async fn load_settings(store: &Store) -> Result<Settings> {
    store
        .with_collections(&[Collection::Settings], Mode::ReadWrite, |scope| {
            async move {
                match scope.get::<Settings>(Collection::Settings, SETTINGS_KEY).await {
                    Ok(Some(settings)) if validate_settings(&settings).is_ok() => {
                        return Ok(settings);
                    }
                    Ok(Some(_)) => warn!("Stored settings are out of range, resetting"),
                    Ok(None) => info!("No stored settings, writing defaults"),
                    Err(e) if e.is_absent() => warn!("Resetting unreadable settings: {}", e),
                    Err(e) => return Err(e),
                }

                let settings = Settings::default();
                scope.put(Collection::Settings, SETTINGS_KEY, &settings).await?;
                Ok(settings)
            }
            .boxed()
        })
        .await
}

pub async fn save_settings(store: &Store, settings: &Settings) -> Result<()> {
    validate_settings(settings)?;
    let settings = settings.clone();
    store
        .with_collections(&[Collection::Settings], Mode::ReadWrite, move |scope| {
            async move { scope.put(Collection::Settings, SETTINGS_KEY, &settings).await }.boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Theme;

    #[tokio::test]
    async fn test_first_load_writes_defaults() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(load_settings(&store).await.unwrap(), Settings::default());

        let mut scope = store
            .begin(&[Collection::Settings], Mode::ReadOnly)
            .await
            .unwrap();
        assert!(scope.contains(Collection::Settings, SETTINGS_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = Store::open_in_memory().await.unwrap();
        let settings = Settings {
            theme: Theme::Light,
            skip_times: vec![-15.0, 2.5],
            marker_time_adjustment: 0.25,
        };
        save_settings(&store, &settings).await.unwrap();
        assert_eq!(load_settings(&store).await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_values() {
        let store = Store::open_in_memory().await.unwrap();
        let negative = Settings {
            marker_time_adjustment: -0.5,
            ..Settings::default()
        };
        assert!(matches!(
            save_settings(&store, &negative).await,
            Err(Error::ConstraintViolation(_))
        ));

        let nan = Settings {
            skip_times: vec![f64::NAN],
            ..Settings::default()
        };
        assert!(save_settings(&store, &nan).await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_settings_reset() {
        let store = Store::open_in_memory().await.unwrap();
        let mut scope = store
            .begin(&[Collection::Settings], Mode::ReadWrite)
            .await
            .unwrap();
        scope
            .put(Collection::Settings, SETTINGS_KEY, &serde_json::json!({"theme": "neon"}))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        assert_eq!(load_settings(&store).await.unwrap(), Settings::default());
    }

    #[test]
    fn test_adjusted_marker_time_clamps() {
        let settings = Settings {
            marker_time_adjustment: 0.4,
            ..Settings::default()
        };
        assert!((settings.adjusted_marker_time(10.0) - 9.6).abs() < 1e-9);
        assert_eq!(settings.adjusted_marker_time(0.1), 0.0);
    }
}
