/// Driver behaviour fixed when the handle is created and applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPolicy {
    /// Foreign keys are checked by the application, not the database.
    pub enforce_foreign_keys: bool,
    /// Single statements are not wrapped in an implicit transaction. sqlx never does so,
    /// transactions only exist where a caller opens one with `begin`; no pool option reads
    /// this flag.
    pub auto_transaction: bool,
    pub singular_tables: bool,
}

impl DriverPolicy {
    pub const STARTUP: Self = Self {
        enforce_foreign_keys: false,
        auto_transaction: false,
        singular_tables: true,
    };

    /// Table name for a record type, e.g. `UserAuth` becomes `user_auth`.
    pub fn table_name(&self, type_name: &str) -> String {
        let mut name = snake_case(type_name);
        if !self.singular_tables {
            name.push('s');
        }
        name
    }
}

impl Default for DriverPolicy {
    fn default() -> Self {
        Self::STARTUP
    }
}

fn snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (index, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            let prev = index.checked_sub(1).map(|i| chars[i]);
            let next = chars.get(index + 1).copied();
            let boundary = match prev {
                Some(prev) if prev == '_' => false,
                Some(prev) if prev.is_lowercase() || prev.is_ascii_digit() => true,
                Some(prev) if prev.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }

    out
}
