use crate::error::StoreError;
use crate::model::Posting;
use crate::storage::SeenStore;

/// Case-insensitive keyword set. Empty means "let everything through".
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self { keywords: normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }
}

/// A posting is new when its id has never been marked.
pub async fn is_new(store: &dyn SeenStore, posting: &Posting) -> Result<bool, StoreError> {
    Ok(!store.contains(&posting.id).await?)
}

/// Any keyword appearing in title or description (case-insensitive substring) passes.
pub fn passes_keywords(posting: &Posting, keywords: &KeywordSet) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{}\n{}", posting.title, posting.description).to_lowercase();
    keywords.keywords.iter().any(|k| haystack.contains(k.as_str()))
}
