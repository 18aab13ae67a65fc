use crate::config::TomlConfig;
use crate::domain::category::{CategoryMatch, CategoryTree, StandaloneNode, FALLBACK_LANGUAGE};
use crate::domain::map_id::{first_existing_map_id, map_file_name, next_free_map_id, MapLevel};
use crate::utils::error::{IngestError, Result};
use crate::utils::validation::validate_required_field;
use serde::Serialize;

/// 類別查詢的輸出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CategoryListing {
    Found {
        categories: Vec<u32>,
        names: Vec<String>,
        unmatched_words: Vec<String>,
    },
    Tree(Vec<StandaloneNode>),
}

fn load_tree(config: &TomlConfig) -> Result<(CategoryTree, String)> {
    let categories = validate_required_field("categories.tree", &config.categories)?;
    let tree = CategoryTree::load(&categories.tree)?;
    let language = categories
        .language
        .clone()
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string());
    Ok((tree, language))
}

/// 沒有 `find` 時列出整棵類別樹
pub fn list_categories(
    config: &TomlConfig,
    find: Option<&str>,
    lang: Option<&str>,
    exact: bool,
) -> Result<CategoryListing> {
    let (tree, default_language) = load_tree(config)?;
    let language = lang.unwrap_or(default_language.as_str());

    let Some(name) = find else {
        return Ok(CategoryListing::Tree(tree.standalone_nodes(language)));
    };

    let CategoryMatch {
        categories,
        unmatched_words,
    } = tree.find_categories(name, language, exact);
    tracing::debug!("'{}' matched {} categories", name, categories.len());

    let names = categories
        .iter()
        .map(|id| {
            tree.translation(*id, language, Some(FALLBACK_LANGUAGE))
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    Ok(CategoryListing::Found {
        categories: categories.into_iter().collect(),
        names,
        unmatched_words,
    })
}

/// 地圖目錄在某層級的狀態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapDirectoryStatus {
    pub level: MapLevel,
    pub first_existing: Option<String>,
    pub next_free: String,
}

pub fn map_status(config: &TomlConfig, level: &str) -> Result<MapDirectoryStatus> {
    let maps = validate_required_field("maps.directory", &config.maps)?;
    let level = MapLevel::from_name(level).ok_or_else(|| IngestError::InvalidConfigValueError {
        field: "level".to_string(),
        value: level.to_string(),
        reason: "Valid values: underview, overview, country, super".to_string(),
    })?;

    let first_existing = first_existing_map_id(&maps.directory, level)?.map(map_file_name);
    let next_free = map_file_name(next_free_map_id(&maps.directory, level)?);
    Ok(MapDirectoryStatus {
        level,
        first_existing,
        next_free,
    })
}
