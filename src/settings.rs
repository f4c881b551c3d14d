//! # Settings
//!
//! Global defaults, collected into a single immutable value and passed by
//! reference through every component (DESIGN NOTES §9). Grounded on
//! `original_source/reclass/settings.py` and `reclass/defaults.py`.

#[derive(Debug, Clone)]
pub struct Settings {
    /// Path delimiter used by `Path` / references (default `:`).
    pub delimiter: char,
    /// Reference sentinels, default `("${", "}")`.
    pub reference_sentinels: (String, String),
    /// Query (export) sentinels, default `("$[", "]")`.
    pub query_sentinels: (String, String),
    /// Escape character, default `\`.
    pub escape_character: char,
    /// Prefix marking a key for overwrite-mode merge, default `~`.
    pub dict_key_override_prefix: char,
    /// Prefix marking a key as constant after first merge, default `=`.
    pub dict_key_constant_prefix: char,
    /// Sentinel marking an application for removal, default `~`.
    pub application_removal_sentinel: char,

    /// Merge-engine overrides controlling which type clashes are tolerated.
    pub allow_scalar_over_dict: bool,
    pub allow_scalar_over_list: bool,
    pub allow_list_over_scalar: bool,
    pub allow_dict_over_scalar: bool,
    pub allow_none_override: bool,
    pub strict_constant_parameters: bool,

    /// Interpolator behaviour.
    pub ignore_overwritten_missing_references: bool,

    /// Class resolver behaviour.
    pub ignore_class_notfound: bool,
    pub ignore_class_notfound_regexp: Vec<String>,
    pub compose_node_name: bool,

    /// Core/inventory behaviour.
    pub inventory_ignore_failed_node: bool,
    pub inventory_ignore_failed_render: bool,
    pub group_errors: bool,
    pub class_mappings_match_path: bool,

    /// Whether `_reclass_.name.{full,short}` automatic parameters are
    /// injected per node.
    pub automatic_parameters: bool,
    pub default_environment: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            delimiter: ':',
            reference_sentinels: ("${".to_string(), "}".to_string()),
            query_sentinels: ("$[".to_string(), "]".to_string()),
            escape_character: '\\',
            dict_key_override_prefix: '~',
            dict_key_constant_prefix: '=',
            application_removal_sentinel: '~',

            allow_scalar_over_dict: false,
            allow_scalar_over_list: false,
            allow_list_over_scalar: false,
            allow_dict_over_scalar: false,
            allow_none_override: true,
            strict_constant_parameters: false,

            ignore_overwritten_missing_references: false,

            ignore_class_notfound: false,
            ignore_class_notfound_regexp: Vec::new(),
            compose_node_name: false,

            inventory_ignore_failed_node: false,
            inventory_ignore_failed_render: false,
            group_errors: false,
            class_mappings_match_path: false,

            automatic_parameters: true,
            default_environment: "base".to_string(),
        }
    }
}

impl Settings {
    /// Whether the given class name is allowed to be silently skipped when
    /// not found, per `ignore_class_notfound[_regexp]`.
    pub fn should_ignore_missing_class(&self, classname: &str) -> bool {
        if !self.ignore_class_notfound {
            return false;
        }
        if self.ignore_class_notfound_regexp.is_empty() {
            return true;
        }
        self.ignore_class_notfound_regexp.iter().any(|pattern| {
            regex::Regex::new(pattern)
                .map(|re| re.is_match(classname))
                .unwrap_or(false)
        })
    }
}
