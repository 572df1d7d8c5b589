#[cfg(test)]
mod tests {
    use crate::config::{AppState, Config};
    use crate::database::{create_pool, init_database, MEMORY_DATABASE_URL};
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 9000

[jwt]
secret = "test-secret"

[permissions.user.workspace]
tools = true

[plugins]
allowed_imports = ["host.http"]

[plugins.import_rewrites]
legacy = "host.http"

[[tool_servers]]
url = "http://localhost:8081"
key = "abc"

[tool_servers.config]
enable = true

[[toolkits]]
toolkit = "Github"
description = "GitHub tools"
tools = [{ name = "Github.ListRepos" }]
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn path_without_extension(file: &tempfile::NamedTempFile) -> String {
        file.path().with_extension("").display().to_string()
    }

    #[test]
    #[serial]
    fn test_config_defaults_without_file() {
        let config = Config::load("does-not-exist").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jwt.secret, "your-secret-key");
        assert_eq!(config.integrations.timeout_secs, 30);
        assert_eq!(config.permissions.user, json!({"workspace": {"tools": false}}));
        assert!(config.plugins.allowed_imports.contains(&"host.utils".to_string()));
        assert!(config.tool_servers.is_empty());
        assert!(config.arcade.is_none());
    }

    #[test]
    #[serial]
    fn test_config_from_toml_file() {
        let file = write_config(SAMPLE_CONFIG);
        let config = Config::load(&path_without_extension(&file)).unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.jwt.secret, "test-secret");
        assert_eq!(config.permissions.user["workspace"]["tools"], json!(true));
        assert_eq!(config.plugins.allowed_imports, vec!["host.http".to_string()]);
        assert_eq!(config.plugins.import_rewrites["legacy"], "host.http");

        assert_eq!(config.tool_servers.len(), 1);
        assert_eq!(config.tool_servers[0].path, "openapi.json");
        assert!(config.tool_servers[0].config.enable);

        assert_eq!(config.toolkits.len(), 1);
        assert!(config.toolkits[0].enabled);
        assert_eq!(config.toolkits[0].tools[0].name, "Github.ListRepos");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config(SAMPLE_CONFIG);
        std::env::set_var("TOOLS_SERVER__PORT", "9100");
        let config = Config::load(&path_without_extension(&file));
        std::env::remove_var("TOOLS_SERVER__PORT");

        assert_eq!(config.unwrap().server.port, 9100);
    }

    #[tokio::test]
    #[serial]
    async fn test_app_state_with_config() {
        let pool = create_pool(MEMORY_DATABASE_URL).await.unwrap();
        init_database(&pool).await.unwrap();

        let mut config = Config::default();
        config.jwt.secret = "state-secret".to_string();
        let state = AppState::new(pool, config).unwrap();

        assert_eq!(state.jwt_secret, "state-secret");
        assert!(state.broker.is_none());
        assert!(state.tool_servers.get().await.is_none());
    }

    #[test]
    fn test_rewrite_prefixes_are_escaped() {
        // 转义后任何前缀都是合法正则
        let mut config = Config::default();
        config
            .plugins
            .import_rewrites
            .insert("a(b".to_string(), "host.utils".to_string());
        assert!(crate::plugin::ManifestLoader::new(&config.plugins).is_ok());
    }
}
