use crate::query::QueryTransformation;
use crate::registry::ModelInfo;

use super::StorageError;

/// A transformation slice normalised for execution.
///
/// The last page wins, filters and ranges accumulate, omit lists union and
/// dotted preload paths are split at the first `.` so that `orders.product`
/// becomes a `product` preload inside the scope of `orders`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub limit: Option<u64>,
    pub offset: u64,
    /// `(field, descending)` in application order.
    pub order: Vec<(String, bool)>,
    /// Equality filters as raw text.
    pub filters: Vec<(String, String)>,
    /// `[from, to)` bounds over the model's range field.
    pub ranges: Vec<(String, String)>,
    pub omit: Vec<String>,
    pub preloads: Vec<PlannedPreload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPreload {
    pub field: String,
    pub scope: Vec<QueryTransformation>,
}

impl Plan {
    #[must_use]
    pub fn new(query: &[QueryTransformation]) -> Self {
        let mut plan = Self::default();
        for transformation in query {
            plan.apply(transformation);
        }
        plan
    }

    fn apply(&mut self, transformation: &QueryTransformation) {
        match transformation {
            QueryTransformation::Page { limit, offset } => {
                self.limit = u64::try_from(*limit).ok().filter(|limit| *limit > 0);
                self.offset = u64::try_from(*offset).unwrap_or(0);
            }
            QueryTransformation::Omit(fields) => {
                for field in fields {
                    if !self.omit.contains(field) {
                        self.omit.push(field.clone());
                    }
                }
            }
            QueryTransformation::OrderBy { field, descending } => {
                self.order.push((field.clone(), *descending));
            }
            QueryTransformation::FilterBy { field, value } => {
                self.filters.push((field.clone(), value.clone()));
            }
            QueryTransformation::FilterAt { from, to } => {
                self.ranges.push((from.clone(), to.clone()));
            }
            QueryTransformation::Preload { path, scope } => match path.split_once('.') {
                Some((head, rest)) => {
                    let nested = QueryTransformation::preload_with(rest, scope.clone());
                    self.preload_entry(head).push(nested);
                }
                None => self.preload_entry(path).extend(scope.iter().cloned()),
            },
            QueryTransformation::All(inner) => {
                for transformation in inner {
                    self.apply(transformation);
                }
            }
        }
    }

    fn preload_entry(&mut self, field: &str) -> &mut Vec<QueryTransformation> {
        let index = match self.preloads.iter().position(|preload| preload.field == field) {
            Some(index) => index,
            None => {
                self.preloads.push(PlannedPreload {
                    field: field.to_string(),
                    scope: Vec::new(),
                });
                self.preloads.len() - 1
            }
        };
        &mut self.preloads[index].scope
    }

    /// Whether the plan narrows rows at all.
    #[must_use]
    pub fn has_conditions(&self) -> bool {
        !self.filters.is_empty() || !self.ranges.is_empty()
    }

    /// Rejects filters and orderings on fields the model does not store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] naming the first unknown field.
    pub fn check(&self, info: &ModelInfo) -> Result<(), StorageError> {
        let fields = self
            .filters
            .iter()
            .map(|(field, _)| field.as_str())
            .chain(self.order.iter().map(|(field, _)| field.as_str()));
        for field in fields {
            if !info.is_column(field) {
                return Err(StorageError::Query(format!(
                    "unknown field '{field}' on {}",
                    info.type_name
                )));
            }
        }
        if !self.ranges.is_empty() && !info.is_column(&info.range_field) {
            return Err(StorageError::Query(format!(
                "{} has no range field '{}'",
                info.type_name, info.range_field
            )));
        }
        Ok(())
    }
}
