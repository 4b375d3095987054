//! Fee collection: student fees, discounts and payments.
//!
//! A payment changes the paid and due amounts of the student fee it settles,
//! and a discount changes the computed amounts of the student's fees, so both
//! reach into the student-fee views when they are written.

use serde::Serialize;
use serde_json::{json, Value};

use super::models::*;
use crate::api::{ApiRequest, ApiResult};
use crate::cache::{
  first_field, keys, response_or_request, BulkResult, CacheKey, CacheResult, Filters, MutationKind,
  RelationGraph, ResourceCache,
};

/// Where a payment names its student fee, flat or populated.
const STUDENT_FEE_PATHS: &[&str] = &[
  "studentFeeId",
  "studentFeeId._id",
  "studentFeeId.id",
  "studentFee._id",
  "studentFee.id",
];

const ID_PATHS: &[&str] = &["id", "_id"];

/// Custom mutation name of `PATCH /student-discounts/{id}/toggle`.
pub const TOGGLE: &str = "toggle";

/// Detail sub-view holding a payment's receipt.
pub const RECEIPT_VIEW: &str = "receipt";

pub fn register(graph: &mut RelationGraph) {
  use MutationKind::*;

  graph
    .on(
      FEE_PAYMENTS,
      &[Create, Update, Delete],
      "student fee of payment",
      student_fee_of_payment,
    )
    .register(FEE_PAYMENTS, Create, "created payment detail", payment_detail)
    .on(
      STUDENT_DISCOUNTS,
      &[Create, Update, Custom(TOGGLE), Delete],
      "student fees of discount",
      student_fees_of_discount,
    );
}

/// The settled student fee (detail) and every student-fee list.
fn student_fee_of_payment(response: &Value, request: &Value) -> Vec<CacheKey> {
  let mut stale = Vec::new();
  if let Some(fee) = response_or_request(response, request, STUDENT_FEE_PATHS) {
    stale.push(keys::detail(STUDENT_FEES, &fee));
  }
  stale.push(keys::lists(STUDENT_FEES));
  stale
}

fn payment_detail(response: &Value, _request: &Value) -> Vec<CacheKey> {
  first_field(response, ID_PATHS)
    .map(|id| vec![keys::detail(FEE_PAYMENTS, &id)])
    .unwrap_or_default()
}

/// All student-fee lists: the global list and every per-student variant.
/// Discount lists are covered by the discount's own list invalidation.
fn student_fees_of_discount(_response: &Value, _request: &Value) -> Vec<CacheKey> {
  vec![keys::lists(STUDENT_FEES)]
}

impl ResourceCache<StudentFee> {
  pub async fn for_student(&self, student_id: &str) -> ApiResult<Vec<StudentFee>> {
    self.list(&Filters::new().with("studentId", student_id)).await
  }

  /// `POST /student-fees/bulk-generate`: one fee per student from a fee
  /// structure.
  pub async fn bulk_generate(
    &self,
    fee_structure_id: &str,
    student_ids: &[String],
  ) -> ApiResult<BulkResult<StudentFee>> {
    let body = json!({ "feeStructureId": fee_structure_id, "studentIds": student_ids });
    self
      .bulk(ApiRequest::post(self.service().path("bulk-generate")).body(body))
      .await
  }
}

impl ResourceCache<FeeStructure> {
  /// `POST /fee-structures/bulk-generate`: fee structures for several classes
  /// at once.
  pub async fn bulk_generate<D: Serialize + ?Sized>(&self, dto: &D) -> ApiResult<BulkResult<FeeStructure>> {
    let body = serde_json::to_value(dto)?;
    self
      .bulk(ApiRequest::post(self.service().path("bulk-generate")).body(body))
      .await
  }
}

impl ResourceCache<StudentDiscount> {
  pub async fn for_student(&self, student_id: &str) -> ApiResult<Vec<StudentDiscount>> {
    self.list(&Filters::new().with("studentId", student_id)).await
  }

  pub async fn active_for_student(&self, student_id: &str) -> ApiResult<Vec<StudentDiscount>> {
    let filters = Filters::new().with("studentId", student_id).with("isActive", true);
    self.list(&filters).await
  }

  /// Flip a discount between active and inactive.
  pub async fn toggle(&self, id: &str) -> ApiResult<StudentDiscount> {
    let request = ApiRequest::patch(self.service().path(&format!("{}/toggle", id)));
    self.custom(TOGGLE, id, request).await
  }
}

impl ResourceCache<FeePayment> {
  pub async fn create_payment(&self, input: &CreateFeePayment) -> ApiResult<FeePayment> {
    self.create(input).await
  }

  pub async fn update_payment<D: Serialize + ?Sized>(&self, id: &str, dto: &D) -> ApiResult<FeePayment> {
    self.update(id, dto).await
  }

  pub async fn for_student_fee(&self, student_fee_id: &str) -> ApiResult<Vec<FeePayment>> {
    self.list(&Filters::new().with("studentFeeId", student_fee_id)).await
  }

  /// `POST /fee-payments/bulk`. Items that fail server-side are reported in
  /// `failed` and leave the cache untouched.
  pub async fn bulk_create_payments(
    &self,
    payments: &[CreateFeePayment],
  ) -> ApiResult<BulkResult<FeePayment>> {
    let body = json!({ "payments": payments });
    self.bulk(ApiRequest::post(self.service().path("bulk")).body(body)).await
  }

  /// Receipt of a payment, cached under the payment's detail key.
  pub async fn generate_receipt(&self, id: &str) -> ApiResult<CacheResult<Receipt>> {
    let request = ApiRequest::get(self.service().path(&format!("{}/receipt", id)));
    self.view(id, RECEIPT_VIEW, request).await
  }
}
