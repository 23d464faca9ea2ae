/// One flattened event: index-aligned column names and values.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct FlattenedRow {
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

impl FlattenedRow {
    pub fn new() -> Self {
        FlattenedRow::default()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Appends a column, keeping duplicates.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Appends a column, or overwrites the value in place if the column already exists.
    pub fn upsert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();

        match self.columns.iter().position(|c| *c == column) {
            Some(index) => self.values[index] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i].as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Keys each column by its name and how many times that name occurred before it,
    /// so rows with duplicate names can still be aligned to a shared header.
    pub fn keyed_columns(&self) -> Vec<(String, usize)> {
        let mut seen: hashbrown::HashMap<&str, usize> = hashbrown::HashMap::new();

        self.columns
            .iter()
            .map(|column| {
                let occurrence = seen.entry(column.as_str()).or_insert(0);
                let key = (column.clone(), *occurrence);
                *occurrence += 1;
                key
            })
            .collect()
    }
}
