//! Static per-route configuration, built once at registration time and shared
//! read-only by every request on that route.

use std::fmt;
use std::sync::Arc;

use crate::hooks::{DeletePretreat, GetPretreat, Pretreat, QueryScope};
use crate::traits::Model;

/// Page size cap used by [`ListOption::default`].
pub const DEFAULT_LIMIT_MAX: i64 = 10;

/// The five CRUD verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct ListOption {
    pub enabled: bool,
    pub omit: Vec<String>,
    pub limit_max: i64,
    /// Page cap for a collection read through `GET /{ParentID}/<field>`.
    /// Nested reads are single-record by default.
    pub nested_limit_max: i64,
    pub pretreat: Option<Arc<dyn GetPretreat>>,
    pub query_option: Option<Arc<dyn QueryScope>>,
}

impl Default for ListOption {
    fn default() -> Self {
        Self {
            enabled: true,
            omit: Vec::new(),
            limit_max: DEFAULT_LIMIT_MAX,
            nested_limit_max: 1,
            pretreat: None,
            query_option: None,
        }
    }
}

impl ListOption {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit_max(mut self, limit_max: i64) -> Self {
        self.limit_max = limit_max;
        self
    }

    /// Pages nested collections up to `limit_max` records instead of one.
    #[must_use]
    pub fn with_nested_limit_max(mut self, limit_max: i64) -> Self {
        self.nested_limit_max = limit_max;
        self
    }

    #[must_use]
    pub fn with_omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omit = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_pretreat(mut self, pretreat: impl GetPretreat + 'static) -> Self {
        self.pretreat = Some(Arc::new(pretreat));
        self
    }

    #[must_use]
    pub fn with_query_option(mut self, scope: impl QueryScope + 'static) -> Self {
        self.query_option = Some(Arc::new(scope));
        self
    }
}

#[derive(Clone)]
pub struct GetOption {
    pub enabled: bool,
    pub omit: Vec<String>,
    pub pretreat: Option<Arc<dyn GetPretreat>>,
    pub query_option: Option<Arc<dyn QueryScope>>,
}

impl Default for GetOption {
    fn default() -> Self {
        Self {
            enabled: true,
            omit: Vec::new(),
            pretreat: None,
            query_option: None,
        }
    }
}

impl GetOption {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omit = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_pretreat(mut self, pretreat: impl GetPretreat + 'static) -> Self {
        self.pretreat = Some(Arc::new(pretreat));
        self
    }

    #[must_use]
    pub fn with_query_option(mut self, scope: impl QueryScope + 'static) -> Self {
        self.query_option = Some(Arc::new(scope));
        self
    }
}

pub struct CreateOption<T> {
    pub enabled: bool,
    pub omit: Vec<String>,
    pub pretreat: Option<Arc<dyn Pretreat<T>>>,
    pub query_option: Option<Arc<dyn QueryScope>>,
}

impl<T> Clone for CreateOption<T> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            omit: self.omit.clone(),
            pretreat: self.pretreat.clone(),
            query_option: self.query_option.clone(),
        }
    }
}

impl<T> Default for CreateOption<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            omit: Vec::new(),
            pretreat: None,
            query_option: None,
        }
    }
}

impl<T: 'static> CreateOption<T> {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omit = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_pretreat(mut self, pretreat: impl Pretreat<T> + 'static) -> Self {
        self.pretreat = Some(Arc::new(pretreat));
        self
    }

    #[must_use]
    pub fn with_query_option(mut self, scope: impl QueryScope + 'static) -> Self {
        self.query_option = Some(Arc::new(scope));
        self
    }
}

pub struct UpdateOption<T: Model> {
    pub enabled: bool,
    pub omit: Vec<String>,
    /// Identities that can never be updated through this route.
    pub limit_id: Vec<T::Id>,
    pub pretreat: Option<Arc<dyn Pretreat<T>>>,
    pub query_option: Option<Arc<dyn QueryScope>>,
}

impl<T: Model> Clone for UpdateOption<T> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            omit: self.omit.clone(),
            limit_id: self.limit_id.clone(),
            pretreat: self.pretreat.clone(),
            query_option: self.query_option.clone(),
        }
    }
}

impl<T: Model> Default for UpdateOption<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            omit: Vec::new(),
            limit_id: Vec::new(),
            pretreat: None,
            query_option: None,
        }
    }
}

impl<T: Model> UpdateOption<T> {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omit = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_limit_id(mut self, ids: impl IntoIterator<Item = T::Id>) -> Self {
        self.limit_id = ids.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_pretreat(mut self, pretreat: impl Pretreat<T> + 'static) -> Self {
        self.pretreat = Some(Arc::new(pretreat));
        self
    }

    #[must_use]
    pub fn with_query_option(mut self, scope: impl QueryScope + 'static) -> Self {
        self.query_option = Some(Arc::new(scope));
        self
    }
}

pub struct DeleteOption<T: Model> {
    pub enabled: bool,
    /// Identities that can never be deleted through this route.
    pub limit_id: Vec<T::Id>,
    pub pretreat: Option<Arc<dyn DeletePretreat>>,
    pub query_option: Option<Arc<dyn QueryScope>>,
}

impl<T: Model> Clone for DeleteOption<T> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            limit_id: self.limit_id.clone(),
            pretreat: self.pretreat.clone(),
            query_option: self.query_option.clone(),
        }
    }
}

impl<T: Model> Default for DeleteOption<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_id: Vec::new(),
            pretreat: None,
            query_option: None,
        }
    }
}

impl<T: Model> DeleteOption<T> {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit_id(mut self, ids: impl IntoIterator<Item = T::Id>) -> Self {
        self.limit_id = ids.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_pretreat(mut self, pretreat: impl DeletePretreat + 'static) -> Self {
        self.pretreat = Some(Arc::new(pretreat));
        self
    }

    #[must_use]
    pub fn with_query_option(mut self, scope: impl QueryScope + 'static) -> Self {
        self.query_option = Some(Arc::new(scope));
        self
    }
}

/// All five operation options for one model type.
///
/// The default enables every verb with a list page cap of [`DEFAULT_LIMIT_MAX`].
pub struct CrudOption<T: Model> {
    pub list: ListOption,
    pub get: GetOption,
    pub create: CreateOption<T>,
    pub update: UpdateOption<T>,
    pub delete: DeleteOption<T>,
}

impl<T: Model> Clone for CrudOption<T> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
            get: self.get.clone(),
            create: self.create.clone(),
            update: self.update.clone(),
            delete: self.delete.clone(),
        }
    }
}

impl<T: Model> Default for CrudOption<T> {
    fn default() -> Self {
        Self {
            list: ListOption::default(),
            get: GetOption::default(),
            create: CreateOption::default(),
            update: UpdateOption::default(),
            delete: DeleteOption::default(),
        }
    }
}

impl<T: Model> CrudOption<T> {
    #[must_use]
    pub fn with_list(mut self, list: ListOption) -> Self {
        self.list = list;
        self
    }

    #[must_use]
    pub fn with_get(mut self, get: GetOption) -> Self {
        self.get = get;
        self
    }

    #[must_use]
    pub fn with_create(mut self, create: CreateOption<T>) -> Self {
        self.create = create;
        self
    }

    #[must_use]
    pub fn with_update(mut self, update: UpdateOption<T>) -> Self {
        self.update = update;
        self
    }

    #[must_use]
    pub fn with_delete(mut self, delete: DeleteOption<T>) -> Self {
        self.delete = delete;
        self
    }
}
