//! Read-side queries over stored case instances
//!
//! Queries are plain builders. Filters narrow the result, an optional order
//! sorts it (ties are broken by instance id so paging is stable), and
//! `offset`/`limit` page through it. Without an explicit limit the engine's
//! default page size applies. `count` ignores paging.

use crate::repository::CaseRepository;
use case_types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sort direction of a query order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sortable plan item instance properties
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanItemOrder {
    Name,
    CreatedAt,
    ElementId,
}

#[derive(Clone, Copy, Debug, Default)]
struct Page {
    offset: usize,
    limit: Option<usize>,
}

impl Page {
    fn apply<T>(&self, items: Vec<T>, default_page_size: usize) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(default_page_size))
            .collect()
    }
}

fn single<T>(mut items: Vec<T>) -> CaseResult<Option<T>> {
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        n => Err(CaseError::NotUnique(n)),
    }
}

// ── Plan Item Instances ──────────────────────────────────────────────

/// Query over plan item instances of every stored case
#[derive(Clone)]
pub struct PlanItemInstanceQuery {
    repository: Arc<dyn CaseRepository>,
    default_page_size: usize,
    case_instance_id: Option<CaseInstanceId>,
    case_definition_id: Option<CaseDefinitionId>,
    stage_instance_id: Option<PlanItemInstanceId>,
    element_id: Option<PlanItemId>,
    definition_ref: Option<String>,
    kind: Option<PlanItemKind>,
    state: Option<PlanItemState>,
    name: Option<String>,
    include_ended: bool,
    order: Option<(PlanItemOrder, SortDirection)>,
    page: Page,
}

impl PlanItemInstanceQuery {
    pub(crate) fn new(repository: Arc<dyn CaseRepository>, default_page_size: usize) -> Self {
        Self {
            repository,
            default_page_size,
            case_instance_id: None,
            case_definition_id: None,
            stage_instance_id: None,
            element_id: None,
            definition_ref: None,
            kind: None,
            state: None,
            name: None,
            include_ended: false,
            order: None,
            page: Page::default(),
        }
    }

    pub fn case_instance_id(mut self, id: &CaseInstanceId) -> Self {
        self.case_instance_id = Some(id.clone());
        self
    }

    pub fn case_definition_id(mut self, id: &CaseDefinitionId) -> Self {
        self.case_definition_id = Some(id.clone());
        self
    }

    /// Direct children of a stage instance
    pub fn stage_instance_id(mut self, id: &PlanItemInstanceId) -> Self {
        self.stage_instance_id = Some(id.clone());
        self
    }

    pub fn element_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(PlanItemId::new(id));
        self
    }

    pub fn plan_item_definition_id(mut self, definition_ref: impl Into<String>) -> Self {
        self.definition_ref = Some(definition_ref.into());
        self
    }

    pub fn plan_item_definition_type(mut self, kind: PlanItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn state(mut self, state: PlanItemState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn state_available(self) -> Self {
        self.state(PlanItemState::Available)
    }

    pub fn state_enabled(self) -> Self {
        self.state(PlanItemState::Enabled)
    }

    pub fn state_active(self) -> Self {
        self.state(PlanItemState::Active)
    }

    pub fn state_waiting_for_repetition(self) -> Self {
        self.state(PlanItemState::WaitingForRepetition)
    }

    /// Filtering on a terminal state includes ended instances on its own
    pub fn state_completed(self) -> Self {
        self.state(PlanItemState::Completed)
    }

    pub fn state_terminated(self) -> Self {
        self.state(PlanItemState::Terminated)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Also return completed and terminated instances
    pub fn include_ended(mut self) -> Self {
        self.include_ended = true;
        self
    }

    pub fn order_by_name(mut self) -> Self {
        self.order = Some((PlanItemOrder::Name, SortDirection::Asc));
        self
    }

    pub fn order_by_created_at(mut self) -> Self {
        self.order = Some((PlanItemOrder::CreatedAt, SortDirection::Asc));
        self
    }

    pub fn order_by_element_id(mut self) -> Self {
        self.order = Some((PlanItemOrder::ElementId, SortDirection::Asc));
        self
    }

    /// Direction of the last `order_by_*`
    pub fn asc(mut self) -> Self {
        if let Some((_, direction)) = &mut self.order {
            *direction = SortDirection::Asc;
        }
        self
    }

    pub fn desc(mut self) -> Self {
        if let Some((_, direction)) = &mut self.order {
            *direction = SortDirection::Desc;
        }
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.page.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.page.limit = Some(limit);
        self
    }

    fn matches(&self, item: &PlanItemInstance) -> bool {
        let state_ok = match self.state {
            Some(state) => item.state == state,
            None => self.include_ended || item.is_live(),
        };
        state_ok
            && self
                .case_definition_id
                .as_ref()
                .map_or(true, |id| &item.case_definition_id == id)
            && self
                .stage_instance_id
                .as_ref()
                .map_or(true, |id| item.stage_instance_id.as_ref() == Some(id))
            && self
                .element_id
                .as_ref()
                .map_or(true, |id| &item.plan_item_id == id)
            && self
                .definition_ref
                .as_ref()
                .map_or(true, |r| &item.definition_ref == r)
            && self.kind.map_or(true, |kind| item.kind == kind)
            && self.name.as_ref().map_or(true, |name| &item.name == name)
    }

    fn collect(&self) -> CaseResult<Vec<PlanItemInstance>> {
        let cases = match &self.case_instance_id {
            Some(id) => match self.repository.load(id) {
                Ok(case) => vec![case],
                Err(CaseError::CaseInstanceNotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => self.repository.list()?,
        };

        let mut items: Vec<PlanItemInstance> = cases
            .into_iter()
            .flat_map(|case| case.plan_items.into_iter())
            .filter(|item| self.matches(item))
            .collect();

        if let Some((order, direction)) = self.order {
            items.sort_by(|a, b| {
                let ordering = match order {
                    PlanItemOrder::Name => a.name.cmp(&b.name),
                    PlanItemOrder::CreatedAt => a.created_at.cmp(&b.created_at),
                    PlanItemOrder::ElementId => a.plan_item_id.cmp(&b.plan_item_id),
                };
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                ordering.then_with(|| a.id.cmp(&b.id))
            });
        }
        Ok(items)
    }

    pub fn list(&self) -> CaseResult<Vec<PlanItemInstance>> {
        Ok(self.page.apply(self.collect()?, self.default_page_size))
    }

    pub fn count(&self) -> CaseResult<usize> {
        Ok(self.collect()?.len())
    }

    /// The only match; more than one is [`CaseError::NotUnique`]
    pub fn single(&self) -> CaseResult<Option<PlanItemInstance>> {
        single(self.collect()?)
    }
}

// ── User Event Listeners ─────────────────────────────────────────────

/// Read view of a user event listener instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserEventListenerInstance {
    pub id: PlanItemInstanceId,
    pub name: String,
    pub case_instance_id: CaseInstanceId,
    pub case_definition_id: CaseDefinitionId,
    pub element_id: PlanItemId,
    pub plan_item_definition_id: String,
    pub stage_instance_id: Option<PlanItemInstanceId>,
    pub state: PlanItemState,
}

impl From<PlanItemInstance> for UserEventListenerInstance {
    fn from(item: PlanItemInstance) -> Self {
        Self {
            id: item.id,
            name: item.name,
            case_instance_id: item.case_instance_id,
            case_definition_id: item.case_definition_id,
            element_id: item.plan_item_id,
            plan_item_definition_id: item.definition_ref,
            stage_instance_id: item.stage_instance_id,
            state: item.state,
        }
    }
}

/// Query over user event listener instances
#[derive(Clone)]
pub struct UserEventListenerInstanceQuery {
    inner: PlanItemInstanceQuery,
}

impl UserEventListenerInstanceQuery {
    pub(crate) fn new(repository: Arc<dyn CaseRepository>, default_page_size: usize) -> Self {
        Self {
            inner: PlanItemInstanceQuery::new(repository, default_page_size)
                .plan_item_definition_type(PlanItemKind::UserEventListener),
        }
    }

    pub fn case_instance_id(self, id: &CaseInstanceId) -> Self {
        Self {
            inner: self.inner.case_instance_id(id),
        }
    }

    pub fn case_definition_id(self, id: &CaseDefinitionId) -> Self {
        Self {
            inner: self.inner.case_definition_id(id),
        }
    }

    pub fn stage_instance_id(self, id: &PlanItemInstanceId) -> Self {
        Self {
            inner: self.inner.stage_instance_id(id),
        }
    }

    pub fn element_id(self, id: impl Into<String>) -> Self {
        Self {
            inner: self.inner.element_id(id),
        }
    }

    pub fn plan_item_definition_id(self, definition_ref: impl Into<String>) -> Self {
        Self {
            inner: self.inner.plan_item_definition_id(definition_ref),
        }
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            inner: self.inner.name(name),
        }
    }

    pub fn state_available(self) -> Self {
        Self {
            inner: self.inner.state_available(),
        }
    }

    pub fn state_suspended(self) -> Self {
        Self {
            inner: self.inner.state(PlanItemState::Suspended),
        }
    }

    pub fn order_by_name(self) -> Self {
        Self {
            inner: self.inner.order_by_name(),
        }
    }

    pub fn asc(self) -> Self {
        Self {
            inner: self.inner.asc(),
        }
    }

    pub fn desc(self) -> Self {
        Self {
            inner: self.inner.desc(),
        }
    }

    pub fn offset(self, offset: usize) -> Self {
        Self {
            inner: self.inner.offset(offset),
        }
    }

    pub fn limit(self, limit: usize) -> Self {
        Self {
            inner: self.inner.limit(limit),
        }
    }

    pub fn list(&self) -> CaseResult<Vec<UserEventListenerInstance>> {
        Ok(self.inner.list()?.into_iter().map(Into::into).collect())
    }

    pub fn count(&self) -> CaseResult<usize> {
        self.inner.count()
    }

    pub fn single(&self) -> CaseResult<Option<UserEventListenerInstance>> {
        Ok(self.inner.single()?.map(Into::into))
    }
}

// ── Case Instances ───────────────────────────────────────────────────

/// Query over case instances
#[derive(Clone)]
pub struct CaseInstanceQuery {
    repository: Arc<dyn CaseRepository>,
    default_page_size: usize,
    definition_key: Option<String>,
    definition_id: Option<CaseDefinitionId>,
    state: Option<CaseState>,
    page: Page,
}

impl CaseInstanceQuery {
    pub(crate) fn new(repository: Arc<dyn CaseRepository>, default_page_size: usize) -> Self {
        Self {
            repository,
            default_page_size,
            definition_key: None,
            definition_id: None,
            state: None,
            page: Page::default(),
        }
    }

    pub fn case_definition_key(mut self, key: impl Into<String>) -> Self {
        self.definition_key = Some(key.into());
        self
    }

    pub fn case_definition_id(mut self, id: &CaseDefinitionId) -> Self {
        self.definition_id = Some(id.clone());
        self
    }

    pub fn state(mut self, state: CaseState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn active(self) -> Self {
        self.state(CaseState::Active)
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.page.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.page.limit = Some(limit);
        self
    }

    fn collect(&self) -> CaseResult<Vec<CaseInstance>> {
        Ok(self
            .repository
            .list()?
            .into_iter()
            .filter(|case| {
                self.definition_key
                    .as_ref()
                    .map_or(true, |key| &case.definition_key == key)
                    && self
                        .definition_id
                        .as_ref()
                        .map_or(true, |id| &case.definition_id == id)
                    && self.state.map_or(true, |state| case.state == state)
            })
            .collect())
    }

    pub fn list(&self) -> CaseResult<Vec<CaseInstance>> {
        Ok(self.page.apply(self.collect()?, self.default_page_size))
    }

    pub fn count(&self) -> CaseResult<usize> {
        Ok(self.collect()?.len())
    }

    pub fn single(&self) -> CaseResult<Option<CaseInstance>> {
        single(self.collect()?)
    }
}

