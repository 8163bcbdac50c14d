//! Starter files written by `dcheck init`.

pub const PLAN_JSON: &str = include_str!("../templates/deploy-check.json");
pub const STANDARD_DEPLOY_YML: &str = include_str!("../templates/standard-deploy.yml");
pub const OBJ_HEADERS_CUSTOM_INDEX_YML: &str =
    include_str!("../templates/obj-headers-custom-index.yml");

/// Relative paths (from the plan directory) and contents of the starter templates.
pub const STARTER_TEMPLATES: [(&str, &str); 2] = [
    ("config_files/standard-deploy.yml", STANDARD_DEPLOY_YML),
    (
        "config_files/obj-headers-custom-index.yml",
        OBJ_HEADERS_CUSTOM_INDEX_YML,
    ),
];
