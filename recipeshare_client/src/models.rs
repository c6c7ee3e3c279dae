use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub partner_code: String,
}

/// User record as served by the login, who-am-I and profile endpoints:
/// the user plus their bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub token: String,
    #[serde(flatten)]
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeDetails {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub data: RecipeData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeData {
    #[serde(default)]
    pub ingredients: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub directions: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Partner entry. `recipe_count` is only populated in the active list;
/// pending entries default it to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub recipe_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingPartners {
    #[serde(default)]
    pub incoming: Vec<Partner>,
    #[serde(default)]
    pub outgoing: Vec<Partner>,
}

/// Combined payload returned by the mutations that change both the active
/// and the pending sets at once.
#[derive(Debug, Clone, Deserialize)]
pub struct AllPartners {
    pub active: Vec<Partner>,
    pub pending: PendingPartners,
}

/// Which resource classes the remote re-sync actually changed.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SyncChanges {
    #[serde(default)]
    pub categories: bool,
    #[serde(default)]
    pub recipes: bool,
    #[serde(default)]
    pub photos: bool,
}
