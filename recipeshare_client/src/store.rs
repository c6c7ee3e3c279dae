use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::api::{paths, ApiRequest, Transport, TransportError};
use crate::models::{
    AllPartners, Category, Partner, PendingPartners, RecipeDetails, RecipeSummary, SyncChanges,
};

lazy_static! {
    // partner codes look like "name#42"
    static ref PARTNER_CODE: Regex = Regex::new(r"^[^#]+#\d+$").expect("partner code pattern");
}

/// Flattened category mapping, uid to display name.
pub type CategoryMap = HashMap<String, String>;

/// Whose data is being viewed. "Self" is an explicit variant rather than an
/// absent key, so "never queried" and "queried for self" cannot be
/// confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Own,
    Partner(i64),
}

impl Scope {
    pub fn partner_id(self) -> Option<i64> {
        match self {
            Self::Own => None,
            Self::Partner(id) => Some(id),
        }
    }

    fn apply_to(self, request: ApiRequest) -> ApiRequest {
        match self {
            Self::Own => request,
            Self::Partner(id) => request.with_query("partner_id", id),
        }
    }
}

impl From<Option<i64>> for Scope {
    fn from(partner_id: Option<i64>) -> Self {
        match partner_id {
            Some(id) => Self::Partner(id),
            None => Self::Own,
        }
    }
}

#[derive(Debug, PartialEq, Error)]
pub enum PartnershipError {
    #[error("partner code is malformed")]
    MalformedCode,
    #[error("you cannot add yourself as a partner")]
    CannotAddSelf,
    #[error("no user with that partner code")]
    NoSuchUser,
    #[error("partnership request failed: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PartnershipError {
    fn from_token(token: &str) -> Self {
        match token {
            "no_such_user" => Self::NoSuchUser,
            "cannot_add_self" => Self::CannotAddSelf,
            other => Self::Rejected(other.to_string()),
        }
    }
}

#[derive(Default)]
struct StoreState {
    categories: HashMap<Scope, CategoryMap>,
    recipes: HashMap<Scope, Vec<RecipeSummary>>,
    partners: Vec<Partner>,
    pending: PendingPartners,
}

enum StoreAction {
    SetCategories {
        scope: Scope,
        categories: Vec<Category>,
    },
    SetRecipes {
        scope: Scope,
        recipes: Vec<RecipeSummary>,
    },
    SetActivePartners(Vec<Partner>),
    SetPendingPartners(PendingPartners),
    SetAllPartners {
        active: Vec<Partner>,
        pending: PendingPartners,
    },
}

fn apply(state: &mut StoreState, action: StoreAction) {
    match action {
        StoreAction::SetCategories { scope, categories } => {
            state.categories.insert(scope, flatten_categories(&categories));
        }
        StoreAction::SetRecipes { scope, recipes } => {
            state.recipes.insert(scope, recipes);
        }
        StoreAction::SetActivePartners(partners) => state.partners = partners,
        StoreAction::SetPendingPartners(pending) => state.pending = pending,
        StoreAction::SetAllPartners { active, pending } => {
            state.partners = active;
            state.pending = pending;
        }
    }
}

/// Pre-order flatten of a category tree into a uid-to-name mapping. Every
/// node appears exactly once; uids are unique across the tree.
pub fn flatten_categories(categories: &[Category]) -> CategoryMap {
    fn walk(categories: &[Category], map: &mut CategoryMap) {
        for category in categories {
            map.insert(category.uid.clone(), category.name.clone());
            walk(&category.children, map);
        }
    }
    let mut map = CategoryMap::new();
    walk(categories, &mut map);
    map
}

/// Per-scope cache of categories and recipes plus the partner-relationship
/// collections. Loads replace whole cache slots on success and keep the
/// previous contents on any failure; nothing is retried automatically.
///
/// State is locked only to apply a completed response, never across an
/// await, so concurrent loads for different scopes are independent and
/// concurrent loads for the same scope resolve to last-writer-wins by
/// completion order.
pub struct PartnerStore {
    transport: Arc<dyn Transport>,
    state: Mutex<StoreState>,
}

impl PartnerStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn dispatch(&self, action: StoreAction) {
        apply(&mut self.state.lock().unwrap(), action);
    }

    /// Issues a request and decodes a 2xx body; anything else is logged and
    /// swallowed so callers keep their previous state.
    async fn fetch_decoded<T: DeserializeOwned>(&self, request: ApiRequest) -> Option<T> {
        let path = request.path.clone();
        match self.transport.request(request).await {
            Ok(response) if response.ok() => match serde_json::from_value(response.body) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    warn!("malformed payload from {path}: {err}");
                    None
                }
            },
            Ok(response) => {
                warn!("request to {path} failed with status {}", response.status);
                None
            }
            Err(err) => {
                warn!("request to {path} failed: {err}");
                None
            }
        }
    }

    /// Fetches the category tree for a scope and replaces that scope's
    /// flattened mapping.
    pub async fn load_categories(&self, scope: Scope) {
        let request = scope.apply_to(ApiRequest::get(paths::CATEGORIES));
        if let Some(categories) = self.fetch_decoded::<Vec<Category>>(request).await {
            self.dispatch(StoreAction::SetCategories { scope, categories });
        }
    }

    /// Fetches the recipe list for a scope and replaces that scope's slot.
    pub async fn load_recipes(&self, scope: Scope) {
        let request = scope.apply_to(ApiRequest::get(paths::RECIPES));
        if let Some(recipes) = self.fetch_decoded::<Vec<RecipeSummary>>(request).await {
            self.dispatch(StoreAction::SetRecipes { scope, recipes });
        }
    }

    /// Uncached detail read, scope- and id-parameterized.
    pub async fn fetch_recipe(&self, scope: Scope, id: i64) -> Option<RecipeDetails> {
        self.fetch_decoded(scope.apply_to(ApiRequest::get(paths::recipe(id)))).await
    }

    pub async fn load_active_partners(&self) {
        if let Some(partners) = self
            .fetch_decoded::<Vec<Partner>>(ApiRequest::get(paths::PARTNERS_ACTIVE))
            .await
        {
            self.dispatch(StoreAction::SetActivePartners(partners));
        }
    }

    pub async fn load_pending_partners(&self) {
        if let Some(pending) = self
            .fetch_decoded::<PendingPartners>(ApiRequest::get(paths::PARTNERS_PENDING))
            .await
        {
            self.dispatch(StoreAction::SetPendingPartners(pending));
        }
    }

    /// Sends a partner code to request a partnership. Malformed codes and
    /// self-partnering (checked against `own_code` when the caller knows
    /// it) never reach the network. On success the server response is the
    /// source of truth: both the active and the pending sets are replaced
    /// together. This is the one operation whose failure is surfaced to the
    /// caller.
    pub async fn request_partnership(
        &self,
        code: &str,
        own_code: Option<&str>,
    ) -> Result<(), PartnershipError> {
        let code = code.trim();
        if !PARTNER_CODE.is_match(code) {
            return Err(PartnershipError::MalformedCode);
        }
        if own_code == Some(code) {
            return Err(PartnershipError::CannotAddSelf);
        }
        let request = ApiRequest::post(paths::PARTNERS_PENDING, json!({ "partner_code": code }));
        let response = self.transport.request(request).await?;
        if response.ok() && response.error_token().is_none() {
            let AllPartners { active, pending } = serde_json::from_value(response.body)
                .map_err(|err| {
                    PartnershipError::Rejected(format!("unexpected response payload: {err}"))
                })?;
            self.dispatch(StoreAction::SetAllPartners { active, pending });
            Ok(())
        } else {
            match response.error_token() {
                Some(token) => Err(PartnershipError::from_token(token)),
                None => Err(PartnershipError::Rejected(format!(
                    "status {}",
                    response.status
                ))),
            }
        }
    }

    /// Removes an active partner. The active set is replaced with the
    /// server-returned collection rather than filtered locally, so
    /// concurrent server-side changes are kept.
    pub async fn delete_active_partner(&self, id: i64) {
        if let Some(partners) = self
            .fetch_decoded::<Vec<Partner>>(ApiRequest::delete(paths::partner_active(id)))
            .await
        {
            self.dispatch(StoreAction::SetActivePartners(partners));
        }
    }

    /// Cancels an outgoing request or rejects an incoming one.
    pub async fn delete_pending_partner(&self, id: i64) {
        if let Some(pending) = self
            .fetch_decoded::<PendingPartners>(ApiRequest::delete(paths::partner_pending(id)))
            .await
        {
            self.dispatch(StoreAction::SetPendingPartners(pending));
        }
    }

    /// Approves an incoming request, which moves it from pending to active;
    /// both collections are replaced together from the response.
    pub async fn approve_pending_partner(&self, id: i64) {
        if let Some(AllPartners { active, pending }) = self
            .fetch_decoded::<AllPartners>(ApiRequest::put(paths::partner_pending(id)))
            .await
        {
            self.dispatch(StoreAction::SetAllPartners { active, pending });
        }
    }

    /// Triggers a remote re-sync, then reloads the self-scope slots whose
    /// resource class the server reported as changed. Photo URLs are
    /// embedded in recipe payloads, so a photo change also reloads recipes.
    /// Partner-scoped caches are never refreshed here.
    pub async fn refresh_paprika(&self) -> Option<SyncChanges> {
        let request = ApiRequest::post(paths::REFRESH_PAPRIKA, json!({}));
        let changes = self.fetch_decoded::<SyncChanges>(request).await?;
        info!(
            "sync reported changes: categories={} recipes={} photos={}",
            changes.categories, changes.recipes, changes.photos
        );
        if changes.categories {
            self.load_categories(Scope::Own).await;
        }
        if changes.recipes || changes.photos {
            self.load_recipes(Scope::Own).await;
        }
        Some(changes)
    }

    /// Flattened category mapping for a scope; empty when never loaded.
    pub fn categories_for(&self, scope: Scope) -> CategoryMap {
        self.state
            .lock()
            .unwrap()
            .categories
            .get(&scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Recipe list for a scope. `None` means the slot has never loaded;
    /// `Some(vec![])` means the scope really has no recipes.
    pub fn recipes_for(&self, scope: Scope) -> Option<Vec<RecipeSummary>> {
        self.state.lock().unwrap().recipes.get(&scope).cloned()
    }

    pub fn active_partners(&self) -> Vec<Partner> {
        self.state.lock().unwrap().partners.clone()
    }

    pub fn pending_partners(&self) -> PendingPartners {
        self.state.lock().unwrap().pending.clone()
    }

    pub fn partner_name(&self, id: i64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .partners
            .iter()
            .find(|partner| partner.id == id)
            .map(|partner| partner.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CannedResponse, FakeTransport};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn setup() -> (Arc<FakeTransport>, PartnerStore) {
        let transport = FakeTransport::new();
        let store = PartnerStore::new(transport.clone());
        (transport, store)
    }

    fn recipe(id: i64, name: &str) -> Value {
        json!({"id": id, "name": name, "photo_url": null, "categories": []})
    }

    fn partner(id: i64, name: &str, recipe_count: i64) -> Value {
        json!({"id": id, "name": name, "recipe_count": recipe_count})
    }

    #[test]
    fn flatten_walks_the_tree_in_pre_order() {
        let tree = vec![Category {
            uid: "1".into(),
            name: "A".into(),
            children: vec![Category {
                uid: "2".into(),
                name: "B".into(),
                children: vec![],
            }],
        }];
        let map = flatten_categories(&tree);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("1").map(String::as_str), Some("A"));
        assert_eq!(map.get("2").map(String::as_str), Some("B"));
    }

    #[tokio::test]
    async fn loading_one_scope_never_touches_another() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([recipe(10, "Goulash")])));

        store.load_recipes(Scope::Partner(7)).await;

        assert_eq!(store.recipes_for(Scope::Own), None);
        assert_eq!(store.recipes_for(Scope::Partner(3)), None);
        let partner_recipes = store.recipes_for(Scope::Partner(7)).expect("loaded");
        assert_eq!(partner_recipes.len(), 1);
        assert_eq!(partner_recipes[0].name, "Goulash");

        let request = &transport.requests()[0];
        assert_eq!(request.query, vec![("partner_id".to_string(), "7".to_string())]);
    }

    #[tokio::test]
    async fn own_scope_requests_carry_no_partner_query() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([])));

        store.load_recipes(Scope::Own).await;

        assert!(transport.requests()[0].query.is_empty());
        // loaded-and-empty is distinct from never-loaded
        assert_eq!(store.recipes_for(Scope::Own), Some(vec![]));
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_slot() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([recipe(1, "Toast")])));
        store.load_recipes(Scope::Own).await;

        transport.push(CannedResponse::status(500, Value::Null));
        store.load_recipes(Scope::Own).await;

        let recipes = store.recipes_for(Scope::Own).expect("still loaded");
        assert_eq!(recipes[0].name, "Toast");
    }

    #[tokio::test]
    async fn failed_first_load_leaves_slot_unloaded() {
        let (transport, store) = setup();
        transport.push(CannedResponse::status(500, Value::Null));

        store.load_recipes(Scope::Own).await;

        assert_eq!(store.recipes_for(Scope::Own), None);
    }

    #[tokio::test]
    async fn categories_default_to_empty_until_loaded() {
        let (transport, store) = setup();
        assert!(store.categories_for(Scope::Own).is_empty());

        transport.push(CannedResponse::ok(json!([
            {"uid": "a", "name": "Mains", "children": [
                {"uid": "b", "name": "Pasta", "children": []},
            ]},
        ])));
        store.load_categories(Scope::Own).await;

        let map = store.categories_for(Scope::Own);
        assert_eq!(map.get("b").map(String::as_str), Some("Pasta"));
        assert!(store.categories_for(Scope::Partner(3)).is_empty());
    }

    #[tokio::test]
    async fn same_scope_loads_apply_in_completion_order() {
        let (transport, store) = setup();
        let store = Arc::new(store);
        let first_gate = Arc::new(Notify::new());
        let second_gate = Arc::new(Notify::new());
        transport.push(CannedResponse::gated(
            json!([{"uid": "1", "name": "First", "children": []}]),
            first_gate.clone(),
        ));
        transport.push(CannedResponse::gated(
            json!([{"uid": "1", "name": "Second", "children": []}]),
            second_gate.clone(),
        ));

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.load_categories(Scope::Own).await }
        });
        while transport.request_count() < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.load_categories(Scope::Own).await }
        });
        while transport.request_count() < 2 {
            tokio::task::yield_now().await;
        }

        // complete in reverse issue order: the first-issued request wins
        // because it finishes last
        second_gate.notify_one();
        second.await.expect("second load");
        first_gate.notify_one();
        first.await.expect("first load");

        let map = store.categories_for(Scope::Own);
        assert_eq!(map.get("1").map(String::as_str), Some("First"));
    }

    #[tokio::test]
    async fn partnership_request_replaces_both_collections() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!({
            "active": [partner(2, "Bea", 4)],
            "pending": {"incoming": [], "outgoing": [partner(3, "Cam", 0)]},
        })));

        store
            .request_partnership("bea#2", Some("ada#1"))
            .await
            .expect("partnership");

        assert_eq!(store.active_partners().len(), 1);
        assert_eq!(store.pending_partners().outgoing.len(), 1);
        let request = &transport.requests()[0];
        assert_eq!(request.body, Some(json!({"partner_code": "bea#2"})));
    }

    #[tokio::test]
    async fn partnership_error_is_surfaced_and_state_untouched() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([partner(2, "Bea", 4)])));
        store.load_active_partners().await;

        transport.push(CannedResponse::status(404, json!({"error": "no_such_user"})));
        let err = store
            .request_partnership("ghost#9", Some("ada#1"))
            .await
            .unwrap_err();

        assert_eq!(err, PartnershipError::NoSuchUser);
        assert_eq!(store.active_partners().len(), 1);
        assert_eq!(store.pending_partners(), PendingPartners::default());
    }

    #[tokio::test]
    async fn malformed_code_never_reaches_the_network() {
        let (transport, store) = setup();
        let err = store
            .request_partnership("bad code", None)
            .await
            .unwrap_err();
        assert_eq!(err, PartnershipError::MalformedCode);

        let err = store
            .request_partnership("ada#1", Some("ada#1"))
            .await
            .unwrap_err();
        assert_eq!(err, PartnershipError::CannotAddSelf);

        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn approve_moves_a_partner_out_of_pending() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(
            json!({"incoming": [partner(5, "Eve", 0)], "outgoing": []}),
        ));
        store.load_pending_partners().await;
        assert_eq!(store.pending_partners().incoming.len(), 1);

        transport.push(CannedResponse::ok(json!({
            "active": [partner(5, "Eve", 12)],
            "pending": {"incoming": [], "outgoing": []},
        })));
        store.approve_pending_partner(5).await;

        assert_eq!(store.active_partners()[0].recipe_count, 12);
        assert!(store.pending_partners().incoming.is_empty());
    }

    #[tokio::test]
    async fn deletes_take_the_server_collection_verbatim() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([
            partner(2, "Bea", 4),
            partner(3, "Cam", 1),
        ])));
        store.load_active_partners().await;

        // server reports a set that also reflects someone else's deletion
        transport.push(CannedResponse::ok(json!([])));
        store.delete_active_partner(2).await;

        assert!(store.active_partners().is_empty());
    }

    #[tokio::test]
    async fn refresh_paprika_reloads_only_flagged_classes() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(
            json!({"categories": false, "recipes": true, "photos": false}),
        ));
        transport.push(CannedResponse::ok(json!([recipe(1, "Toast")])));

        let changes = store.refresh_paprika().await.expect("sync");
        assert!(changes.recipes);

        let request_paths: Vec<String> = transport.request_paths();
        assert_eq!(
            request_paths,
            vec![
                paths::REFRESH_PAPRIKA.to_string(),
                paths::RECIPES.to_string(),
            ]
        );
        // the recipes reload targets the self scope
        assert!(transport.requests()[1].query.is_empty());
        assert_eq!(store.recipes_for(Scope::Own).map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn refresh_paprika_with_photo_changes_reloads_recipes() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!({"photos": true})));
        transport.push(CannedResponse::ok(json!([])));

        store.refresh_paprika().await.expect("sync");

        assert_eq!(
            transport.request_paths(),
            vec![
                paths::REFRESH_PAPRIKA.to_string(),
                paths::RECIPES.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn refresh_paprika_with_no_changes_reloads_nothing() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!({})));

        store.refresh_paprika().await.expect("sync");

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn partner_name_comes_from_the_active_list() {
        let (transport, store) = setup();
        transport.push(CannedResponse::ok(json!([partner(2, "Bea", 4)])));
        store.load_active_partners().await;

        assert_eq!(store.partner_name(2).as_deref(), Some("Bea"));
        assert_eq!(store.partner_name(9), None);
    }
}
