// ABOUTME: Run configuration built from a TOML profile overlaid by CLI flags
// ABOUTME: Produces one validated SyncConfig per export or import run

use crate::checkpoint::RunProgress;
use crate::codec::Format;
use crate::dialect::Driver;
use crate::error::SyncError;
use crate::filters::TableFilter;
use crate::table_name::parse_table_names;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_SNAPSHOT_DIR: &str = "./snapshots";

/// Where and how to reach the database
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionSettings {
    pub driver: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl ConnectionSettings {
    pub fn port_or_default(&self, driver: Driver) -> u16 {
        self.port.unwrap_or_else(|| driver.default_port())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    #[serde(default)]
    connection: ConnectionProfile,
    #[serde(default)]
    snapshot: SnapshotProfile,
    #[serde(default)]
    tables: TablesProfile,
    #[serde(default)]
    import: ImportProfile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionProfile {
    driver: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    database: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotProfile {
    dir: Option<PathBuf>,
    prefix: Option<String>,
    format: Option<Format>,
    chunk_size: Option<usize>,
    include_schema: Option<bool>,
    include_view_data: Option<bool>,
    archive: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TablesProfile {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    exclude_schema: Vec<String>,
    #[serde(default)]
    exclude_data: Vec<String>,
    #[serde(default)]
    filters: Vec<TableFilterConfig>,
}

#[derive(Debug, Deserialize)]
struct TableFilterConfig {
    table: String,
    #[serde(rename = "where")]
    predicate: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportProfile {
    truncate: Option<bool>,
    upsert: Option<bool>,
}

/// Values given on the command line; `Some`/`true` wins over the profile
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<PathBuf>,
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub format: Option<Format>,
    pub chunk_size: Option<usize>,
    pub tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub exclude_table_schema: Vec<String>,
    pub exclude_table_data: Vec<String>,
    pub no_schema: bool,
    pub include_view_data: bool,
    pub truncate: bool,
    pub upsert: bool,
    pub resume: bool,
    pub resume_from: Option<String>,
    pub archive: bool,
    pub archive_key: Option<String>,
}

/// Everything one run needs, validated
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub connection: ConnectionSettings,
    /// Root directory of the local snapshot store
    pub storage_dir: PathBuf,
    /// Key prefix of this snapshot inside the store
    pub prefix: String,
    pub filter: TableFilter,
    pub format: Format,
    pub chunk_size: usize,
    pub include_schema: bool,
    pub include_view_data: bool,
    pub truncate: bool,
    pub upsert: bool,
    pub resume: bool,
    /// Explicit cursor; takes precedence over a saved checkpoint
    pub resume_from: Option<RunProgress>,
    /// Export: also write a `.zip` archive. Import: read from an archive
    pub archive: bool,
    /// Import from this archive key instead of the latest one
    pub archive_key: Option<String>,
}

impl SyncConfig {
    /// Defaults for everything except the connection
    pub fn new(connection: ConnectionSettings) -> Self {
        Self {
            connection,
            storage_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            prefix: String::new(),
            filter: TableFilter::empty(),
            format: Format::Sql,
            chunk_size: DEFAULT_CHUNK_SIZE,
            include_schema: true,
            include_view_data: false,
            truncate: false,
            upsert: false,
            resume: false,
            resume_from: None,
            archive: false,
            archive_key: None,
        }
    }

    /// Build the run configuration from an optional profile file and CLI values
    pub fn load(overrides: Overrides) -> Result<Self> {
        let profile = match overrides.profile.as_deref() {
            Some(path) => load_profile(path)?,
            None => ProfileFile::default(),
        };
        Self::merge(profile, overrides)
    }

    fn merge(profile: ProfileFile, cli: Overrides) -> Result<Self> {
        let ProfileFile {
            connection,
            snapshot,
            tables,
            import,
        } = profile;

        let connection = ConnectionSettings {
            driver: cli.driver.or(connection.driver).unwrap_or_default(),
            host: cli
                .host
                .or(connection.host)
                .unwrap_or_else(|| "localhost".to_string()),
            port: cli.port.or(connection.port),
            user: cli.user.or(connection.user).unwrap_or_default(),
            password: cli.password,
            database: cli.database.or(connection.database).unwrap_or_default(),
        };

        let pick = |cli: Vec<String>, profile: Vec<String>| if cli.is_empty() { profile } else { cli };
        let table_list = |names: Vec<String>, what: &str| {
            parse_table_names(names)
                .map_err(|e| SyncError::Configuration(format!("Invalid {}: {:#}", what, e)))
        };

        let mut filter = TableFilter::new(
            table_list(pick(cli.tables, tables.include), "table selection")?,
            table_list(pick(cli.exclude_tables, tables.exclude), "exclude_tables")?,
            table_list(
                pick(cli.exclude_table_schema, tables.exclude_schema),
                "exclude_table_schema",
            )?,
            table_list(
                pick(cli.exclude_table_data, tables.exclude_data),
                "exclude_table_data",
            )?,
        )
        .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;

        for entry in tables.filters {
            let table = table_list(vec![entry.table], "filter table")?
                .into_iter()
                .next()
                .ok_or_else(|| SyncError::Configuration("Empty filter table".to_string()))?;
            filter
                .add_condition(table, entry.predicate)
                .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;
        }

        let resume_from = cli
            .resume_from
            .as_deref()
            .map(|raw| {
                raw.parse::<RunProgress>().map_err(|e| {
                    SyncError::Configuration(format!("Invalid --resume-from '{}': {:#}", raw, e))
                })
            })
            .transpose()?;

        let config = Self {
            connection,
            storage_dir: cli
                .dir
                .or(snapshot.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            prefix: cli.prefix.or(snapshot.prefix).unwrap_or_default(),
            filter,
            format: cli.format.or(snapshot.format).unwrap_or(Format::Sql),
            chunk_size: cli
                .chunk_size
                .or(snapshot.chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            include_schema: !cli.no_schema && snapshot.include_schema.unwrap_or(true),
            include_view_data: cli.include_view_data
                || snapshot.include_view_data.unwrap_or(false),
            truncate: cli.truncate || import.truncate.unwrap_or(false),
            upsert: cli.upsert || import.upsert.unwrap_or(false),
            resume: cli.resume || resume_from.is_some(),
            resume_from,
            archive: cli.archive || cli.archive_key.is_some() || snapshot.archive.unwrap_or(false),
            archive_key: cli.archive_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no run could succeed with
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| -> Result<()> { Err(SyncError::Configuration(message).into()) };

        if self.connection.driver.trim().is_empty() {
            return fail("No database driver given (use --driver or [connection].driver)".into());
        }
        self.connection.driver.parse::<Driver>()?;
        if self.connection.database.trim().is_empty() {
            return fail("No database name given (use --database or [connection].database)".into());
        }
        if self.connection.host.trim().is_empty() {
            return fail("Database host cannot be empty".into());
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be at least 1".into());
        }
        if self.prefix.split('/').any(|part| part == "..") {
            return fail(format!("Snapshot prefix '{}' must not contain '..'", self.prefix));
        }
        Ok(())
    }

    pub fn driver(&self) -> Result<Driver> {
        Ok(self.connection.driver.parse()?)
    }

    /// Human-readable snapshot location, also part of the checkpoint identity
    pub fn location(&self) -> String {
        let root = self.storage_dir.display().to_string();
        if self.prefix.is_empty() {
            root
        } else {
            format!("{}/{}", root.trim_end_matches('/'), self.prefix.trim_matches('/'))
        }
    }
}

fn load_profile(path: &Path) -> Result<ProfileFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    toml::from_str(&raw).map_err(|e| {
        SyncError::Configuration(format!(
            "Failed to parse TOML config at {}: {}",
            path.display(),
            e
        ))
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_name::TableName;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn t(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn profile(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{}", contents).unwrap();
        tmp
    }

    fn is_configuration_error(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Configuration(_))
        )
    }

    #[test]
    fn parse_sample_profile() {
        let tmp = profile(
            r#"
            [connection]
            driver = "mariadb"
            host = "db.internal"
            port = 3307
            user = "backup"
            database = "shop"

            [snapshot]
            dir = "/var/snapshots"
            prefix = "shop/daily"
            format = "json"
            chunk_size = 250
            include_view_data = true

            [tables]
            exclude = ["sessions"]
            exclude_data = ["logs"]

            [[tables.filters]]
            table = "orders"
            where = "created_at >= '2024-01-01'"

            [import]
            truncate = true
        "#,
        );

        let config = SyncConfig::load(Overrides {
            profile: Some(tmp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.driver().unwrap(), Driver::MySql);
        assert_eq!(config.connection.port_or_default(Driver::MySql), 3307);
        assert_eq!(config.format, Format::Json);
        assert_eq!(config.chunk_size, 250);
        assert!(config.include_schema);
        assert!(config.include_view_data);
        assert!(config.truncate);
        assert!(!config.upsert);
        assert!(!config.filter.should_process(&t("sessions")));
        assert!(!config.filter.should_copy_data(&t("logs")));
        assert_eq!(
            config.filter.condition(&t("orders")),
            Some("created_at >= '2024-01-01'")
        );
        assert_eq!(config.location(), "/var/snapshots/shop/daily");
    }

    #[test]
    fn cli_values_override_profile() {
        let tmp = profile(
            r#"
            [connection]
            driver = "mysql"
            database = "shop"

            [snapshot]
            format = "json"
            chunk_size = 10

            [tables]
            include = ["orders"]
        "#,
        );

        let config = SyncConfig::load(Overrides {
            profile: Some(tmp.path().to_path_buf()),
            driver: Some("postgres".into()),
            format: Some(Format::Sql),
            tables: vec!["customers".into()],
            no_schema: true,
            resume_from: Some("2:3".into()),
            password: Some("secret".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.driver().unwrap(), Driver::Postgres);
        assert_eq!(config.connection.port_or_default(Driver::Postgres), 5432);
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
        assert_eq!(config.format, Format::Sql);
        assert_eq!(config.chunk_size, 10);
        assert!(!config.include_schema);
        assert!(config.filter.should_process(&t("customers")));
        assert!(!config.filter.should_process(&t("orders")));
        assert!(config.resume);
        assert_eq!(config.resume_from, Some(RunProgress::new(2, 3)));
    }

    #[test]
    fn defaults_without_profile() {
        let config = SyncConfig::load(Overrides {
            driver: Some("mysql".into()),
            database: Some("shop".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.format, Format::Sql);
        assert_eq!(config.connection.host, "localhost");
        assert!(config.filter.is_empty());
        assert!(!config.resume);
        assert_eq!(config.location(), DEFAULT_SNAPSHOT_DIR);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let base = || Overrides {
            driver: Some("mysql".into()),
            database: Some("shop".into()),
            ..Default::default()
        };

        let err = SyncConfig::load(Overrides {
            database: None,
            ..base()
        })
        .unwrap_err();
        assert!(is_configuration_error(&err));

        let err = SyncConfig::load(Overrides {
            chunk_size: Some(0),
            ..base()
        })
        .unwrap_err();
        assert!(is_configuration_error(&err));

        let err = SyncConfig::load(Overrides {
            resume_from: Some("x:1".into()),
            ..base()
        })
        .unwrap_err();
        assert!(is_configuration_error(&err));

        let err = SyncConfig::load(Overrides {
            tables: vec!["bad;name".into()],
            ..base()
        })
        .unwrap_err();
        assert!(is_configuration_error(&err));

        let err = SyncConfig::load(Overrides {
            driver: Some("oracle".into()),
            ..base()
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsupportedDialect(_))
        ));
    }

    #[test]
    fn unknown_profile_keys_are_rejected() {
        let tmp = profile("[snapshot]\nchunksize = 5\n");
        let err = SyncConfig::load(Overrides {
            profile: Some(tmp.path().to_path_buf()),
            driver: Some("mysql".into()),
            database: Some("shop".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(is_configuration_error(&err));
    }
}
