// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Three-tier option resolution.
//!
//! Connection settings arrive as key/value options attached to three
//! separate catalog objects: the foreign server, the user mapping, and the
//! foreign table. Each key is recognized in exactly one of those contexts.
//! [`validate_options`] is the host's validator hook (run at DDL time, one
//! context per call); [`resolve_options`] merges all three layers into one
//! [`ConnectionConfig`] and is run before every estimate or scan.
//!
//! Resolution performs no I/O.

use itertools::Itertools;
use tds_dblib::{ConnectionConfig, DblibError, QuerySource};

/// Which catalog object an option list is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionContext {
    Server,
    UserMapping,
    Table,
}

/// The recognized options and the context each belongs to.
pub const VALID_OPTIONS: &[(&str, OptionContext)] = &[
    ("servername", OptionContext::Server),
    ("language", OptionContext::Server),
    ("character_set", OptionContext::Server),
    ("port", OptionContext::Server),
    ("username", OptionContext::UserMapping),
    ("password", OptionContext::UserMapping),
    ("database", OptionContext::Table),
    ("query", OptionContext::Table),
    ("table", OptionContext::Table),
];

fn is_valid_option(name: &str, context: OptionContext) -> bool {
    VALID_OPTIONS
        .iter()
        .any(|(valid, valid_context)| *valid == name && *valid_context == context)
}

/// Validates one context's option list: every key must be recognized in
/// this context, appear at most once, and carry a well-formed value;
/// `query` and `table` exclude each other.
pub fn validate_options(
    context: OptionContext,
    options: &[(String, String)],
) -> Result<(), DblibError> {
    let mut seen: Vec<&str> = Vec::with_capacity(options.len());
    let mut have_query = false;
    let mut have_table = false;

    for (name, value) in options {
        if !is_valid_option(name, context) {
            let valid = VALID_OPTIONS
                .iter()
                .filter(|(_, valid_context)| *valid_context == context)
                .map(|(valid, _)| *valid)
                .join(", ");
            return Err(DblibError::Configuration(format!(
                "invalid option \"{name}\"; valid options in this context are: {valid}"
            )));
        }
        if seen.contains(&name.as_str()) {
            return Err(DblibError::Configuration(format!(
                "redundant option: {name} ({value})"
            )));
        }
        seen.push(name);

        match name.as_str() {
            "query" => {
                if have_table {
                    return Err(DblibError::Configuration(
                        "conflicting options: query cannot be used with table".into(),
                    ));
                }
                have_query = true;
            }
            "table" => {
                if have_query {
                    return Err(DblibError::Configuration(
                        "conflicting options: table cannot be used with query".into(),
                    ));
                }
                have_table = true;
            }
            "port" => {
                if value.parse::<u16>().is_err() {
                    return Err(DblibError::Configuration(format!(
                        "invalid value for option port: {value}"
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn get(options: &[(String, String)], key: &str) -> Option<String> {
    options
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.clone())
}

/// Merges the three option layers into one validated, defaulted
/// [`ConnectionConfig`].
pub fn resolve_options(
    table_options: &[(String, String)],
    server_options: &[(String, String)],
    user_mapping_options: &[(String, String)],
) -> Result<ConnectionConfig, DblibError> {
    validate_options(OptionContext::Table, table_options)?;
    validate_options(OptionContext::Server, server_options)?;
    validate_options(OptionContext::UserMapping, user_mapping_options)?;

    let source = match (get(table_options, "query"), get(table_options, "table")) {
        (Some(query), None) => QuerySource::Query(query),
        (None, Some(table)) => QuerySource::Table(table),
        (Some(_), Some(_)) => {
            return Err(DblibError::Configuration(
                "conflicting options: query cannot be used with table".into(),
            ));
        }
        (None, None) => {
            return Err(DblibError::Configuration(
                "either a table or a query must be specified".into(),
            ));
        }
    };

    let username = get(user_mapping_options, "username").unwrap_or_default();
    let password = get(user_mapping_options, "password").unwrap_or_default();
    let mut config = ConnectionConfig::new(username, password, source);

    if let Some(servername) = get(server_options, "servername") {
        config = config.with_servername(servername);
    }
    if let Some(port) = get(server_options, "port") {
        // Well-formedness was checked by validate_options above.
        if let Ok(port) = port.parse::<u16>() {
            config = config.with_port(port);
        }
    }
    if let Some(language) = get(server_options, "language") {
        config = config.with_language(language);
    }
    if let Some(character_set) = get(server_options, "character_set") {
        config = config.with_character_set(character_set);
    }
    if let Some(database) = get(table_options, "database") {
        config = config.with_database(database);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tds_dblib::DEFAULT_SERVERNAME;

    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn table_synthesizes_select_star() {
        let config = resolve_options(&opts(&[("table", "t")]), &[], &[]).unwrap();
        assert_eq!(config.effective_query(), "SELECT * FROM t");
    }

    #[test]
    fn servername_defaults_to_loopback() {
        let config = resolve_options(&opts(&[("table", "t")]), &[], &[]).unwrap();
        assert_eq!(config.servername(), DEFAULT_SERVERNAME);
    }

    #[test]
    fn all_layers_merge() {
        let config = resolve_options(
            &opts(&[("table", "emp"), ("database", "hr")]),
            &opts(&[
                ("servername", "db.example.com"),
                ("port", "1433"),
                ("language", "us_english"),
                ("character_set", "UTF-8"),
            ]),
            &opts(&[("username", "u"), ("password", "p")]),
        )
        .unwrap();
        assert_eq!(config.addr(), "db.example.com:1433");
        assert_eq!(config.database(), Some("hr"));
        assert_eq!(config.language(), Some("us_english"));
        assert_eq!(config.character_set(), Some("UTF-8"));
        assert_eq!(config.username(), "u");
        assert_eq!(config.password(), "p");
    }

    #[test]
    fn query_and_table_conflict_in_either_order() {
        for pairs in [
            [("query", "SELECT 1"), ("table", "t")],
            [("table", "t"), ("query", "SELECT 1")],
        ] {
            let err = resolve_options(&opts(&pairs), &[], &[]).unwrap_err();
            assert!(matches!(err, DblibError::Configuration(_)), "{err}");
            assert!(err.to_string().contains("conflicting options"));
        }
    }

    #[test]
    fn neither_query_nor_table_is_rejected() {
        let err = resolve_options(&opts(&[("database", "hr")]), &[], &[]).unwrap_err();
        assert!(err.to_string().contains("either a table or a query"));
    }

    #[test]
    fn unknown_option_names_the_valid_set() {
        let err = validate_options(OptionContext::Server, &opts(&[("hostname", "x")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid option \"hostname\""));
        assert!(message.contains("servername, language, character_set, port"));
    }

    #[test]
    fn option_contexts_do_not_leak() {
        // `username` belongs to the user mapping, not the server.
        let err =
            validate_options(OptionContext::Server, &opts(&[("username", "u")])).unwrap_err();
        assert!(matches!(err, DblibError::Configuration(_)));
    }

    #[test]
    fn redundant_option_is_rejected() {
        let err = validate_options(
            OptionContext::Server,
            &opts(&[("servername", "a"), ("servername", "b")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("redundant option: servername"));
    }

    #[test]
    fn bad_port_is_rejected() {
        let err =
            validate_options(OptionContext::Server, &opts(&[("port", "14x3")])).unwrap_err();
        assert!(err.to_string().contains("invalid value for option port"));
    }

    proptest! {
        // Conflicting and redundant table options fail no matter how the
        // declaration order is shuffled.
        #[test]
        fn conflicts_are_order_insensitive(
            extra in proptest::sample::select(vec!["database", "query", "table"]),
            shuffled in Just(vec![
                ("query".to_string(), "SELECT 1".to_string()),
                ("table".to_string(), "t".to_string()),
            ])
            .prop_shuffle(),
        ) {
            let mut options = shuffled;
            options.push((extra.to_string(), "x".to_string()));
            prop_assert!(validate_options(OptionContext::Table, &options).is_err());
        }
    }
}
