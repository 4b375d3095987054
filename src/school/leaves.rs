//! Staff leave requests and leave balances.

use serde_json::{json, Value};

use super::models::*;
use crate::api::{ApiRequest, ApiResult};
use crate::cache::{
  field, keys, response_or_request, CacheKey, CacheResult, Filters, MutationKind, RelationGraph,
  ResourceCache,
};

pub const APPROVE: &str = "approve";
pub const REJECT: &str = "reject";

const EMPLOYEE_PATHS: &[&str] = &[
  "employeeId",
  "employeeId._id",
  "employeeId.id",
  "employee._id",
  "employee.id",
];

const LEAVE_TYPE_PATHS: &[&str] = &["leaveType", "type"];

/// Whether a leave of this type is deducted from the employee's balance.
/// Unpaid and unrecognized types are not.
pub fn affects_balance(leave_type: &str) -> bool {
  let normalized = leave_type.trim().to_ascii_lowercase();
  let kind = normalized
    .trim_end_matches("leave")
    .trim_end_matches(['_', '-', ' ']);
  matches!(
    kind,
    "casual" | "sick" | "annual" | "earned" | "maternity" | "paternity"
  )
}

/// Year a leave counts against: its `year`, else the year of its start date.
fn leave_year(value: &Value) -> Option<i32> {
  field(value, "year")
    .or_else(|| field(value, "startDate").map(|date| date.chars().take(4).collect()))
    .and_then(|year| year.parse().ok())
}

/// `[leaveBalances, list, {employeeId, year}]`. Without a year the key is a
/// pattern covering every year of the employee.
pub fn balance_key(employee_id: &str, year: Option<i32>) -> CacheKey {
  keys::list(
    LEAVE_BALANCES,
    &Filters::new().with("employeeId", employee_id).with_opt("year", year),
  )
}

pub fn register(graph: &mut RelationGraph) {
  use MutationKind::*;

  graph.on(
    LEAVES,
    &[Update, Custom(APPROVE), Custom(REJECT), Delete],
    "employee leaves and balance",
    employee_views,
  );
}

fn employee_views(response: &Value, request: &Value) -> Vec<CacheKey> {
  let Some(employee) = response_or_request(response, request, EMPLOYEE_PATHS) else {
    return Vec::new();
  };
  let mut stale = vec![keys::list(
    LEAVES,
    &Filters::new().with("employeeId", employee.as_str()),
  )];

  let leave_type = response_or_request(response, request, LEAVE_TYPE_PATHS);
  if leave_type.as_deref().is_some_and(affects_balance) {
    let year = leave_year(response).or_else(|| leave_year(request));
    stale.push(balance_key(&employee, year));
  }
  stale
}

impl ResourceCache<Leave> {
  pub async fn for_employee(&self, employee_id: &str) -> ApiResult<Vec<Leave>> {
    self.list(&Filters::new().with("employeeId", employee_id)).await
  }

  pub async fn approve(&self, id: &str) -> ApiResult<Leave> {
    let request = ApiRequest::patch(self.service().path(&format!("{}/approve", id)));
    self.custom(APPROVE, id, request).await
  }

  pub async fn reject(&self, id: &str, reason: Option<&str>) -> ApiResult<Leave> {
    let mut request = ApiRequest::patch(self.service().path(&format!("{}/reject", id)));
    if let Some(reason) = reason {
      request = request.body(json!({ "reason": reason }));
    }
    self.custom(REJECT, id, request).await
  }

  /// `GET /leaves/balance/{employeeId}?year=`
  pub async fn balance(&self, employee_id: &str, year: i32) -> ApiResult<CacheResult<LeaveBalance>> {
    let request = ApiRequest::get(self.service().path(&format!("balance/{}", employee_id)))
      .params(Filters::new().with("year", year).to_params());
    self.read(&balance_key(employee_id, Some(year)), request).await
  }
}
