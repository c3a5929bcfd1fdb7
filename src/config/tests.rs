use super::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config {
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        original_config.ollama.host = "test-host".to_string();
        original_config.ollama.port = 8080;
        original_config.postgres.vector_table = "custom_points".to_string();

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let loaded_config = Config::load(temp_dir.path()).expect("should load config");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [postgres
            vector_dimensions = "many"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_values_rejected_on_load() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        fs::write(
            temp_dir.path().join("config.toml"),
            "[postgres]\nvector_index = \"bad-name\"\n",
        )
        .expect("should write config");

        assert!(Config::load(temp_dir.path()).is_err());
    }

    #[test]
    #[serial]
    fn env_fallback_for_database_url() {
        let previous: Vec<(&str, Option<String>)> = DATABASE_URL_ENV_VARS
            .iter()
            .map(|key| (*key, std::env::var(key).ok()))
            .collect();

        // SAFETY: guarded by #[serial]; no other test thread touches these variables.
        unsafe {
            for key in DATABASE_URL_ENV_VARS {
                std::env::remove_var(key);
            }
            std::env::set_var("DATABASE_URL", "postgresql://env-host/perf");
        }

        let resolved = resolve_database_url(None, None);

        // SAFETY: see above.
        unsafe {
            for (key, value) in previous {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }

        assert_eq!(
            resolved.expect("env url should resolve"),
            "postgresql://env-host/perf"
        );
    }
}

#[test]
fn config_dir_is_named_after_crate() {
    if let Ok(dir) = get_config_dir() {
        let name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .expect("config dir has a file name");
        assert!(name.contains("pgvector-perf"));
    }
}
