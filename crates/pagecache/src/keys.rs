use std::fmt;

use uuid::Uuid;

pub const DATASETS_LIST_PREFIX: &str = "datasets:list:";

/// Identity of one rendered row page.
///
/// Role is part of the key: masked output differs per role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowsPageKey {
    pub dataset_id: Uuid,
    pub page: usize,
    pub page_size: usize,
    pub role: String,
    /// Sorted, escaped, comma separated.
    pub columns: Option<String>,
    pub batch_id: Option<Uuid>,
}

/// `\`, `,` and `:` are backslash-escaped so a name can never read as a
/// separator.
fn escape_column(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | ',' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl RowsPageKey {
    pub fn new(dataset_id: Uuid, page: usize, page_size: usize, role: impl Into<String>) -> Self {
        Self {
            dataset_id,
            page,
            page_size,
            role: role.into(),
            columns: None,
            batch_id: None,
        }
    }

    /// Column order does not matter for the key.
    pub fn with_columns(mut self, columns: Option<&[String]>) -> Self {
        self.columns = columns.filter(|c| !c.is_empty()).map(|cols| {
            let mut sorted: Vec<&str> = cols.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            sorted
                .into_iter()
                .map(escape_column)
                .collect::<Vec<_>>()
                .join(",")
        });
        self
    }

    pub fn with_batch(mut self, batch_id: Option<Uuid>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// rows:<id>:  (every page of a dataset)
    pub fn dataset_prefix(dataset_id: &Uuid) -> String {
        format!("rows:{dataset_id}:")
    }
}

/// rows:<id>:<page>:<size>:<role>[:<cols>][:batch=<id>]
impl fmt::Display for RowsPageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}:{}",
            Self::dataset_prefix(&self.dataset_id),
            self.page,
            self.page_size,
            self.role
        )?;
        if let Some(cols) = &self.columns {
            write!(f, ":{cols}")?;
        }
        if let Some(batch) = &self.batch_id {
            write!(f, ":batch={batch}")?;
        }
        Ok(())
    }
}

/// datasets:list:<page>:<size>:<first 8 hex of blake3(search)>
pub fn datasets_list_key(page: usize, page_size: usize, search: Option<&str>) -> String {
    let digest = blake3::hash(search.unwrap_or("").as_bytes()).to_hex();
    format!("{DATASETS_LIST_PREFIX}{page}:{page_size}:{}", &digest.as_str()[..8])
}
