//! App metadata: maps tool names to the app they belong to, for grouped
//! display in the shell. A bundled list ships with the binary; a well-known
//! upstream tool can refresh it at runtime, best-effort.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fleet::Fleet;

pub const REMOTE_LIST_TOOL: &str = "store_list_apps_with_tools";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppInfo {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(rename = "toolNames", default)]
    pub tool_names: Vec<String>,
}

pub struct AppRegistry {
    apps: Vec<AppInfo>,
    by_tool: HashMap<String, usize>,
    by_slug: HashMap<String, usize>,
}

impl AppRegistry {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        let mut by_tool = HashMap::new();
        let mut by_slug = HashMap::new();
        for (idx, app) in apps.iter().enumerate() {
            by_slug.insert(app.slug.clone(), idx);
            for tool in &app.tool_names {
                by_tool.insert(tool.clone(), idx);
            }
        }
        Self {
            apps,
            by_tool,
            by_slug,
        }
    }

    /// The list shipped with the binary.
    pub fn bundled() -> Self {
        let apps = vec![
            AppInfo {
                slug: "chess".to_string(),
                name: "Chess".to_string(),
                icon: "♟".to_string(),
                category: "games".to_string(),
                tagline: "Play chess against another player or the engine".to_string(),
                tool_names: vec![
                    "chess_create_game".to_string(),
                    "chess_make_move".to_string(),
                    "chess_get_status".to_string(),
                    "chess_list_games".to_string(),
                ],
            },
            AppInfo {
                slug: "testing".to_string(),
                name: "Testing".to_string(),
                icon: "✓".to_string(),
                category: "dev".to_string(),
                tagline: "Run and inspect test suites".to_string(),
                tool_names: vec![
                    "set_project_root".to_string(),
                    "run_tests".to_string(),
                    "list_tests".to_string(),
                    "analyze_coverage".to_string(),
                ],
            },
            AppInfo {
                slug: "store".to_string(),
                name: "App Store".to_string(),
                icon: "🛍".to_string(),
                category: "platform".to_string(),
                tagline: "Discover and install spike.land apps".to_string(),
                tool_names: vec![
                    "store_search_apps".to_string(),
                    "store_list_apps_with_tools".to_string(),
                    "store_install_app".to_string(),
                ],
            },
        ];
        Self::new(apps)
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppInfo> {
        self.apps.iter()
    }

    pub fn app_for_tool(&self, tool_name: &str) -> Option<&AppInfo> {
        self.by_tool.get(tool_name).map(|idx| &self.apps[*idx])
    }

    pub fn app_for_slug(&self, slug: &str) -> Option<&AppInfo> {
        self.by_slug.get(slug).map(|idx| &self.apps[*idx])
    }

    /// Refreshes the registry through the well-known upstream tool, when one
    /// is federated. Every failure mode leaves the current registry intact;
    /// this is a best-effort flow by design.
    pub async fn refresh_from_remote(&mut self, fleet: &mut Fleet) {
        let Some(wire_name) = fleet.all_tools().iter().find_map(|entry| {
            let matches = entry.original_name() == REMOTE_LIST_TOOL
                || entry.namespaced_name.ends_with(REMOTE_LIST_TOOL);
            matches.then(|| entry.namespaced_name.clone())
        }) else {
            return;
        };

        let result = match fleet.call_tool(&wire_name, serde_json::json!({})).await {
            Ok(result) if !result.is_error() => result,
            Ok(_) | Err(_) => {
                debug!("app registry refresh failed; keeping bundled list");
                return;
            }
        };

        let Ok(apps) = serde_json::from_str::<Vec<AppInfo>>(&result.text_content()) else {
            debug!("app registry refresh returned unparsable payload; keeping bundled list");
            return;
        };
        if apps.is_empty() {
            return;
        }

        *self = Self::new(apps);
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::bundled()
    }
}
