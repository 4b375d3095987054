//! Salaries and salary structures.

use serde_json::{json, Value};

use super::models::*;
use crate::api::{ApiRequest, ApiResult};
use crate::cache::{
  keys, response_or_request, BulkResult, CacheKey, Filters, MutationKind, RelationGraph, ResourceCache,
};

const STAFF_PATHS: &[&str] = &["staffId", "staffId._id", "staffId.id", "staff._id", "staff.id"];

pub fn register(graph: &mut RelationGraph) {
  use MutationKind::*;

  graph.on(
    SALARY_STRUCTURES,
    &[Create, Update, Delete],
    "salaries of staff member",
    salaries_of_structure,
  );
}

/// A changed salary structure changes what the staff member's salaries
/// compute to.
fn salaries_of_structure(response: &Value, request: &Value) -> Vec<CacheKey> {
  response_or_request(response, request, STAFF_PATHS)
    .map(|staff| vec![keys::list(SALARIES, &Filters::new().with("staffId", staff))])
    .unwrap_or_default()
}

impl ResourceCache<Salary> {
  pub async fn for_staff(&self, staff_id: &str) -> ApiResult<Vec<Salary>> {
    self.list(&Filters::new().with("staffId", staff_id)).await
  }

  /// `POST /salaries/generate-all`: one salary per active staff member for
  /// the month.
  pub async fn generate_all(&self, month: u32, year: i32) -> ApiResult<BulkResult<Salary>> {
    let body = json!({ "month": month, "year": year });
    self
      .bulk(ApiRequest::post(self.service().path("generate-all")).body(body))
      .await
  }
}
