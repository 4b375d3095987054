//! Entities exposed by the school administration backend.
//!
//! Only the fields the console reasons about are typed; everything else the
//! server sends is kept in `extra` and serialized back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{first_field, Entity, ResourceName};

pub const STUDENTS: ResourceName = "students";
pub const STAFF: ResourceName = "staff";
pub const FEE_CATEGORIES: ResourceName = "feeCategories";
pub const FEE_STRUCTURES: ResourceName = "feeStructures";
pub const STUDENT_FEES: ResourceName = "studentFees";
pub const STUDENT_DISCOUNTS: ResourceName = "studentDiscounts";
pub const FEE_PAYMENTS: ResourceName = "feePayments";
pub const SALARIES: ResourceName = "salaries";
pub const SALARY_STRUCTURES: ResourceName = "salaryStructures";
pub const EXPENSES: ResourceName = "expenses";
pub const PAYMENTS: ResourceName = "payments";
pub const LEAVES: ResourceName = "leaves";
pub const LEAVE_BALANCES: ResourceName = "leaveBalances";
pub const STUDENT_LEAVES: ResourceName = "studentLeaves";
pub const EXAM_RESULTS: ResourceName = "examResults";
pub const TIMETABLES: ResourceName = "timetables";

/// A reference to another entity: either its id, or the entity itself when
/// the server populated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
  Id(String),
  Populated(Value),
}

impl Ref {
  pub fn id(&self) -> Option<String> {
    match self {
      Ref::Id(id) if !id.is_empty() => Some(id.clone()),
      Ref::Id(_) => None,
      Ref::Populated(value) => first_field(value, &["id", "_id"]),
    }
  }
}

/// Id of an optional reference.
pub fn ref_id(reference: &Option<Ref>) -> Option<String> {
  reference.as_ref().and_then(Ref::id)
}

/// Implements [`Entity`] and the id extractor handed to the entity's service.
macro_rules! entity {
  ($ty:ident, $resource:expr) => {
    impl Entity for $ty {
      fn resource() -> ResourceName {
        $resource
      }
    }

    impl $ty {
      /// `id`, or the document-store `_id` when the server sends only that.
      pub fn canonical_id(&self) -> Option<String> {
        self
          .id
          .clone()
          .or_else(|| self.mongo_id.clone())
          .filter(|id| !id.is_empty())
      }
    }
  };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub admission_number: Option<String>,
  pub class_id: Option<Ref>,
  pub section: Option<String>,
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Student, STUDENTS);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub designation: Option<String>,
  pub department: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Staff, STAFF);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCategory {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub name: Option<String>,
  pub description: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(FeeCategory, FEE_CATEGORIES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub name: Option<String>,
  pub class_id: Option<Ref>,
  pub fee_category_id: Option<Ref>,
  pub academic_year: Option<String>,
  pub amount: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(FeeStructure, FEE_STRUCTURES);

/// A fee charged to one student, with its running paid/due amounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFee {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub student_id: Option<Ref>,
  pub fee_structure_id: Option<Ref>,
  pub amount: Option<f64>,
  pub discount_amount: Option<f64>,
  pub paid_amount: Option<f64>,
  pub due_amount: Option<f64>,
  pub due_date: Option<String>,
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(StudentFee, STUDENT_FEES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDiscount {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub student_id: Option<Ref>,
  pub discount_type: Option<String>,
  pub value: Option<f64>,
  pub is_active: Option<bool>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(StudentDiscount, STUDENT_DISCOUNTS);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePayment {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub student_fee_id: Option<Ref>,
  pub student_id: Option<Ref>,
  pub amount: Option<f64>,
  pub payment_method: Option<String>,
  pub payment_date: Option<String>,
  pub receipt_number: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(FeePayment, FEE_PAYMENTS);

/// Body of `POST /fee-payments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeePayment {
  pub student_fee_id: String,
  pub student_id: String,
  pub amount: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payment_method: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payment_date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub remarks: Option<String>,
}

/// Printable receipt of a fee payment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
  pub receipt_number: Option<String>,
  pub amount: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Salary {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub staff_id: Option<Ref>,
  pub month: Option<u32>,
  pub year: Option<i32>,
  pub net_salary: Option<f64>,
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Salary, SALARIES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryStructure {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub staff_id: Option<Ref>,
  pub basic_salary: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(SalaryStructure, SALARY_STRUCTURES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub category: Option<String>,
  pub amount: Option<f64>,
  pub date: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Expense, EXPENSES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub payee: Option<String>,
  pub amount: Option<f64>,
  pub date: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Payment, PAYMENTS);

/// A staff leave request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leave {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub employee_id: Option<Ref>,
  pub leave_type: Option<String>,
  pub start_date: Option<String>,
  pub end_date: Option<String>,
  pub status: Option<String>,
  pub reason: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Leave, LEAVES);

/// Remaining leave days of one employee for one year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveBalance {
  pub employee_id: Option<Ref>,
  pub year: Option<i32>,
  #[serde(flatten)]
  pub balances: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLeave {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub student_id: Option<Ref>,
  pub start_date: Option<String>,
  pub end_date: Option<String>,
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(StudentLeave, STUDENT_LEAVES);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub student_id: Option<Ref>,
  pub exam_id: Option<Ref>,
  pub marks: Option<f64>,
  pub grade: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(ExamResult, EXAM_RESULTS);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  pub mongo_id: Option<String>,
  pub class_id: Option<Ref>,
  pub section: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
entity!(Timetable, TIMETABLES);

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_canonical_id_falls_back_to_mongo_id() {
    let fee: StudentFee = serde_json::from_value(json!({"_id": "F1", "paidAmount": 0})).unwrap();
    assert_eq!(fee.canonical_id(), Some("F1".to_string()));

    let both: StudentFee = serde_json::from_value(json!({"_id": "m", "id": "F1"})).unwrap();
    assert_eq!(both.canonical_id(), Some("F1".to_string()));

    let none: StudentFee = serde_json::from_value(json!({"id": ""})).unwrap();
    assert_eq!(none.canonical_id(), None);
  }

  #[test]
  fn test_populated_refs() {
    let payment: FeePayment = serde_json::from_value(json!({
      "id": "P1",
      "studentFeeId": {"_id": "F1", "amount": 1000},
      "studentId": "S1",
      "amount": 500
    }))
    .unwrap();
    assert_eq!(ref_id(&payment.student_fee_id), Some("F1".to_string()));
    assert_eq!(ref_id(&payment.student_id), Some("S1".to_string()));
  }

  #[test]
  fn test_unknown_fields_survive() {
    let raw = json!({"id": "S1", "firstName": "Ada", "house": "Blue"});
    let student: Student = serde_json::from_value(raw).unwrap();
    assert_eq!(student.extra.get("house"), Some(&json!("Blue")));

    let back = serde_json::to_value(&student).unwrap();
    assert_eq!(back["house"], "Blue");
    assert_eq!(back["firstName"], "Ada");
  }

  #[test]
  fn test_absent_ids_are_not_serialized() {
    let fee: StudentFee = serde_json::from_value(json!({"_id": "F1", "amount": 100})).unwrap();
    let back = serde_json::to_value(&fee).unwrap();
    assert_eq!(back.get("id"), None);
    assert_eq!(back["_id"], "F1");

    let payment: FeePayment = serde_json::from_value(json!({"id": "P1"})).unwrap();
    let back = serde_json::to_value(&payment).unwrap();
    assert_eq!(back["id"], "P1");
    assert_eq!(back.get("_id"), None);
  }
}
