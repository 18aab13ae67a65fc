use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

pub type CategoryId = u32;
pub type CategorySet = BTreeSet<CategoryId>;

/// 找不到指定語言時使用的語言
pub const FALLBACK_LANGUAGE: &str = "english";

const SEPARATORS: &[char] = &[' ', ',', '.'];

#[derive(Debug, Deserialize)]
struct CategoryDocument {
    #[serde(default, rename = "category")]
    categories: Vec<CategoryEntry>,
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    id: CategoryId,
    #[serde(default)]
    names: BTreeMap<String, String>,
    /// 使用者搜尋用的名稱；未提供時使用 `names`
    #[serde(default)]
    search_names: BTreeMap<String, Vec<String>>,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    id: CategoryId,
    #[serde(default)]
    children: Vec<TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub id: CategoryId,
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandaloneNode {
    pub id: CategoryId,
    pub children: Vec<CategoryId>,
    pub name: String,
    pub icon: String,
}

/// 搜尋結果與沒有對應到任何類別的字詞
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMatch {
    pub categories: CategorySet,
    pub unmatched_words: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    roots: Vec<CategoryNode>,
    children: HashMap<CategoryId, Vec<CategoryId>>,
    names: BTreeMap<CategoryId, BTreeMap<String, String>>,
    icons: BTreeMap<CategoryId, String>,
    /// 語言 -> 已排序的 (正規化字詞, 類別)
    word_index: BTreeMap<String, Vec<(String, CategoryId)>>,
    search_strings: Vec<(String, CategoryId)>,
    /// 語言 -> 已排序的 (正規化字詞, search_strings 索引)
    name_index: BTreeMap<String, Vec<(String, usize)>>,
}

fn is_composite(text: &str) -> bool {
    text.contains(SEPARATORS)
}

fn split_words(text: &str) -> Vec<String> {
    text.split(SEPARATORS)
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize(word: &str) -> String {
    word.trim().to_lowercase()
}

/// 在排序索引中找出符合的區段；非精確模式為字首比對
fn matching_range<'a, T>(index: &'a [(String, T)], word: &str, exact: bool) -> &'a [(String, T)] {
    let start = index.partition_point(|(key, _)| key.as_str() < word);
    let len = index[start..]
        .iter()
        .take_while(|(key, _)| {
            if exact {
                key == word
            } else {
                key.starts_with(word)
            }
        })
        .count();
    &index[start..start + len]
}

fn build_children(nodes: &[CategoryNode], map: &mut HashMap<CategoryId, Vec<CategoryId>>) {
    for node in nodes {
        if !node.children.is_empty() {
            map.insert(node.id, node.children.iter().map(|c| c.id).collect());
            build_children(&node.children, map);
        }
    }
}

fn convert_tree(
    entries: Vec<TreeEntry>,
    parent_icon: &str,
    own_icons: &HashMap<CategoryId, String>,
    icons: &mut BTreeMap<CategoryId, String>,
) -> Vec<CategoryNode> {
    entries
        .into_iter()
        .map(|entry| {
            let icon = own_icons
                .get(&entry.id)
                .filter(|icon| !icon.is_empty())
                .cloned()
                .unwrap_or_else(|| parent_icon.to_string());
            let children = convert_tree(entry.children, &icon, own_icons, icons);
            icons.insert(entry.id, icon);
            CategoryNode {
                id: entry.id,
                children,
            }
        })
        .collect()
}

fn prune(nodes: Vec<CategoryNode>, keep: &dyn Fn(CategoryId) -> bool) -> Vec<CategoryNode> {
    let mut kept = Vec::new();
    for mut node in nodes {
        node.children = prune(std::mem::take(&mut node.children), keep);
        if keep(node.id) {
            kept.push(node);
        } else {
            // 子節點提升到被移除節點的層級
            kept.extend(node.children);
        }
    }
    kept
}

fn collect_descendants(
    set: &mut CategorySet,
    id: CategoryId,
    children: &HashMap<CategoryId, Vec<CategoryId>>,
) {
    if !set.insert(id) {
        return;
    }
    if let Some(child_ids) = children.get(&id) {
        for child in child_ids {
            collect_descendants(set, *child, children);
        }
    }
}

impl CategoryTree {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: CategoryDocument = toml::from_str(content)?;

        let mut own_icons = HashMap::new();
        let mut names = BTreeMap::new();
        let mut word_index: BTreeMap<String, Vec<(String, CategoryId)>> = BTreeMap::new();
        let mut search_strings = Vec::new();
        let mut name_index: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();

        for entry in document.categories {
            if let Some(icon) = entry.icon {
                own_icons.insert(entry.id, icon);
            }

            for (lang, name) in &entry.names {
                let words = word_index.entry(lang.clone()).or_default();
                for word in split_words(name) {
                    words.push((normalize(&word), entry.id));
                }
            }

            let search_names: Vec<(String, String)> = if entry.search_names.is_empty() {
                entry
                    .names
                    .iter()
                    .map(|(lang, name)| (lang.clone(), name.clone()))
                    .collect()
            } else {
                entry
                    .search_names
                    .iter()
                    .flat_map(|(lang, list)| list.iter().map(move |n| (lang.clone(), n.clone())))
                    .collect()
            };
            for (lang, search_name) in search_names {
                let string_id = search_strings.len();
                let words = name_index.entry(lang).or_default();
                for word in split_words(&search_name) {
                    words.push((normalize(&word), string_id));
                }
                search_strings.push((search_name, entry.id));
            }

            names.insert(entry.id, entry.names);
        }

        word_index.values_mut().for_each(|index| index.sort());
        name_index.values_mut().for_each(|index| index.sort());

        let mut icons = BTreeMap::new();
        let roots = convert_tree(document.tree, "", &own_icons, &mut icons);
        let mut children = HashMap::new();
        build_children(&roots, &mut children);

        tracing::debug!(
            "Loaded category tree with {} roots and {} translated categories",
            roots.len(),
            names.len()
        );

        Ok(Self {
            roots,
            children,
            names,
            icons,
            word_index,
            search_strings,
            name_index,
        })
    }

    pub fn roots(&self) -> &[CategoryNode] {
        &self.roots
    }

    pub fn icon(&self, id: CategoryId) -> Option<&str> {
        self.icons.get(&id).map(String::as_str)
    }

    pub fn translation(&self, id: CategoryId, lang: &str, fallback: Option<&str>) -> Option<&str> {
        let translations = self.names.get(&id)?;
        translations
            .get(lang)
            .or_else(|| fallback.and_then(|fallback| translations.get(fallback)))
            .map(String::as_str)
    }

    /// 根節點加上所有子孫；未知的 id 回傳空集合
    pub fn all_categories(&self, root: CategoryId) -> CategorySet {
        let mut set = CategorySet::new();
        if self.names.contains_key(&root) {
            collect_descendants(&mut set, root, &self.children);
        }
        set
    }

    fn expand(&self, ids: impl IntoIterator<Item = CategoryId>, set: &mut CategorySet) {
        for id in ids {
            collect_descendants(set, id, &self.children);
        }
    }

    pub fn find_categories(&self, name: &str, lang: &str, exact: bool) -> CategoryMatch {
        let mut unmatched_words = Vec::new();
        let categories = self.find_categories_into(name, lang, exact, &mut unmatched_words);
        CategoryMatch {
            categories,
            unmatched_words,
        }
    }

    fn find_categories_into(
        &self,
        name: &str,
        lang: &str,
        exact: bool,
        unmatched: &mut Vec<String>,
    ) -> CategorySet {
        if is_composite(name) {
            let words = split_words(name);
            let Some((first, rest)) = words.split_first() else {
                return CategorySet::new();
            };

            let mut matching = self.find_categories_into(first, lang, exact, unmatched);
            for word in rest {
                let next = self.find_categories_into(word, lang, exact, unmatched);
                let intersection: CategorySet = matching.intersection(&next).copied().collect();
                if exact && intersection.is_empty() {
                    matching.extend(next);
                } else {
                    matching = intersection;
                }
            }
            return matching;
        }

        let Some(index) = self
            .word_index
            .get(lang)
            .or_else(|| self.word_index.get(FALLBACK_LANGUAGE))
        else {
            return CategorySet::new();
        };

        let word = normalize(name);
        let mut matching = CategorySet::new();
        self.expand(
            matching_range(index, &word, exact).iter().map(|(_, id)| *id),
            &mut matching,
        );
        if matching.is_empty() {
            unmatched.push(word);
        }
        matching
    }

    /// 多字詞類別名稱必須對應到查詢中連續的字詞
    pub fn find_name_categories(&self, name: &str, lang: &str, exact: bool) -> CategoryMatch {
        let words = split_words(name);
        let Some((index_lang, index)) = self
            .name_index
            .get_key_value(lang)
            .or_else(|| self.name_index.get_key_value(FALLBACK_LANGUAGE))
        else {
            return CategoryMatch {
                categories: CategorySet::new(),
                unmatched_words: words,
            };
        };

        let normalized: Vec<String> = words.iter().map(|w| normalize(w)).collect();
        let mut used = vec![false; words.len()];

        let candidates: BTreeSet<usize> = normalized
            .iter()
            .flat_map(|word| matching_range(index, word, exact).iter().map(|(_, id)| *id))
            .collect();

        let mut matched: CategorySet = CategorySet::new();
        for string_id in candidates {
            let (category_name, category_id) = &self.search_strings[string_id];
            let category_words: Vec<String> =
                split_words(category_name).iter().map(|w| normalize(w)).collect();
            // 名稱裡的任一處都可以是類別字串的開頭
            let found = category_words.len();
            let Some(start) = (found > 0)
                .then(|| normalized.windows(found).position(|window| window == category_words.as_slice()))
                .flatten()
            else {
                continue;
            };

            let candidate = self
                .translation(*category_id, index_lang, None)
                .unwrap_or(category_name.as_str())
                .to_lowercase();

            let mut rejected = false;
            let mut replaced = Vec::new();
            for existing_id in &matched {
                let existing = self
                    .translation(*existing_id, index_lang, None)
                    .unwrap_or_default()
                    .to_lowercase();
                if existing.len() >= candidate.len() {
                    if existing.contains(&candidate) {
                        tracing::debug!("Rejected category {}: better match exists", candidate);
                        rejected = true;
                    }
                } else if candidate.contains(&existing) {
                    replaced.push(*existing_id);
                }
            }
            for id in replaced {
                tracing::debug!("Replacing category {} with longer match {}", id, category_id);
                matched.remove(&id);
            }

            if !rejected {
                matched.insert(*category_id);
                used[start..start + found].iter_mut().for_each(|u| *u = true);
            }
        }

        let mut categories = CategorySet::new();
        self.expand(matched, &mut categories);

        CategoryMatch {
            categories,
            unmatched_words: words
                .into_iter()
                .zip(used)
                .filter(|(_, used)| !used)
                .map(|(word, _)| word)
                .collect(),
        }
    }

    pub fn standalone_nodes(&self, lang: &str) -> Vec<StandaloneNode> {
        let mut all = CategorySet::new();
        self.expand(self.roots.iter().map(|root| root.id), &mut all);

        all.into_iter()
            .map(|id| {
                let name_of = |id: CategoryId| {
                    self.translation(id, lang, Some(FALLBACK_LANGUAGE))
                        .unwrap_or_default()
                        .to_string()
                };
                let mut children: Vec<(String, CategoryId)> = self
                    .children
                    .get(&id)
                    .map(|ids| ids.iter().map(|child| (name_of(*child).to_lowercase(), *child)).collect())
                    .unwrap_or_default();
                children.sort();

                StandaloneNode {
                    id,
                    children: children.into_iter().map(|(_, child)| child).collect(),
                    name: name_of(id),
                    icon: self.icon(id).unwrap_or_default().to_string(),
                }
            })
            .collect()
    }

    /// `keep` 回傳 false 的類別會被移除，其子類別提升一層
    pub fn remove_categories(&mut self, keep: impl Fn(CategoryId) -> bool) {
        self.roots = prune(std::mem::take(&mut self.roots), &keep);
        self.children.clear();
        build_children(&self.roots, &mut self.children);

        self.names.retain(|id, _| keep(*id));
        self.icons.retain(|id, _| keep(*id));
        for index in self.word_index.values_mut() {
            index.retain(|(_, id)| keep(*id));
        }

        // 搜尋字串的索引位置會改變，重新編號
        let mut remap = HashMap::new();
        let mut kept_strings = Vec::new();
        for (old_id, entry) in std::mem::take(&mut self.search_strings).into_iter().enumerate() {
            if keep(entry.1) {
                remap.insert(old_id, kept_strings.len());
                kept_strings.push(entry);
            }
        }
        self.search_strings = kept_strings;
        for index in self.name_index.values_mut() {
            index.retain_mut(|(_, string_id)| match remap.get(string_id) {
                Some(new_id) => {
                    *string_id = *new_id;
                    true
                }
                None => false,
            });
            index.sort();
        }
    }
}
