//! The school administration resources wired onto the cache.
//!
//! `Console` owns one [`ResourceCache`] per resource, all sharing a single
//! store and relation graph. The cross-resource rules live next to the
//! operations they follow (`fees`, `leaves`, `payroll`).

pub mod fees;
pub mod leaves;
pub mod models;
pub mod payroll;
pub mod registry;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::api::{ApiResult, EntityService, IdFn, Transport};
use crate::cache::{CacheStore, Entity, Filters, RelationGraph, ResourceCache, ResourceName};
use models::*;

/// Untyped access to a resource, for callers that pick it by name.
pub trait AnyResource: Send + Sync {
  fn name(&self) -> ResourceName;
  fn base_path(&self) -> &'static str;
  fn list_value(&self, filters: Filters) -> BoxFuture<'_, ApiResult<Value>>;
  fn detail_value(&self, id: String) -> BoxFuture<'_, ApiResult<Option<Value>>>;
  fn delete(&self, id: String) -> BoxFuture<'_, ApiResult<()>>;
}

impl<T: Entity> AnyResource for ResourceCache<T> {
  fn name(&self) -> ResourceName {
    self.resource()
  }

  fn base_path(&self) -> &'static str {
    self.service().base_path()
  }

  fn list_value(&self, filters: Filters) -> BoxFuture<'_, ApiResult<Value>> {
    async move { Ok(serde_json::to_value(self.list(&filters).await?)?) }.boxed()
  }

  fn detail_value(&self, id: String) -> BoxFuture<'_, ApiResult<Option<Value>>> {
    async move {
      match self.detail(&id).await? {
        Some(entity) => Ok(Some(serde_json::to_value(entity)?)),
        None => Ok(None),
      }
    }
    .boxed()
  }

  fn delete(&self, id: String) -> BoxFuture<'_, ApiResult<()>> {
    async move { ResourceCache::delete(self, &id).await }.boxed()
  }
}

/// Every invalidation rule of the school domain.
pub fn relation_graph() -> RelationGraph {
  let mut graph = RelationGraph::new();
  fees::register(&mut graph);
  leaves::register(&mut graph);
  payroll::register(&mut graph);
  graph
}

/// All resources of one tenant, sharing one cache store.
#[derive(Debug, Clone)]
pub struct Console {
  store: CacheStore,
  relations: Arc<RelationGraph>,
  pub students: ResourceCache<Student>,
  pub staff: ResourceCache<Staff>,
  pub fee_categories: ResourceCache<FeeCategory>,
  pub fee_structures: ResourceCache<FeeStructure>,
  pub student_fees: ResourceCache<StudentFee>,
  pub student_discounts: ResourceCache<StudentDiscount>,
  pub fee_payments: ResourceCache<FeePayment>,
  pub salaries: ResourceCache<Salary>,
  pub salary_structures: ResourceCache<SalaryStructure>,
  pub expenses: ResourceCache<Expense>,
  pub payments: ResourceCache<Payment>,
  pub leaves: ResourceCache<Leave>,
  pub student_leaves: ResourceCache<StudentLeave>,
  pub exam_results: ResourceCache<ExamResult>,
  pub timetables: ResourceCache<Timetable>,
}

impl Console {
  pub fn new(transport: Arc<dyn Transport>, store: CacheStore) -> Self {
    let relations = Arc::new(relation_graph());
    let bind = Binder {
      transport: &transport,
      store: &store,
      relations: &relations,
    };

    Self {
      students: bind.cache("/students", Student::canonical_id),
      staff: bind.cache("/staff", Staff::canonical_id),
      fee_categories: bind.cache("/fee-categories", FeeCategory::canonical_id),
      fee_structures: bind.cache("/fee-structures", FeeStructure::canonical_id),
      student_fees: bind.cache("/student-fees", StudentFee::canonical_id),
      student_discounts: bind.cache("/student-discounts", StudentDiscount::canonical_id),
      fee_payments: bind.cache("/fee-payments", FeePayment::canonical_id),
      salaries: bind.cache("/salaries", Salary::canonical_id),
      salary_structures: bind.cache("/salary-structures", SalaryStructure::canonical_id),
      expenses: bind.cache("/expenses", Expense::canonical_id),
      payments: bind.cache("/payments", Payment::canonical_id),
      leaves: bind.cache("/leaves", Leave::canonical_id),
      student_leaves: bind.cache("/student-leaves", StudentLeave::canonical_id),
      exam_results: bind.cache("/exam-results", ExamResult::canonical_id),
      timetables: bind.cache("/timetables", Timetable::canonical_id),
      store,
      relations,
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn relations(&self) -> &RelationGraph {
    &self.relations
  }

  /// Look a resource up by its name.
  pub fn resource(&self, name: &str) -> Option<&dyn AnyResource> {
    self.resources().into_iter().find(|r| r.name() == name)
  }

  pub fn resources(&self) -> Vec<&dyn AnyResource> {
    let resources: [&dyn AnyResource; 15] = [
      &self.students,
      &self.staff,
      &self.fee_categories,
      &self.fee_structures,
      &self.student_fees,
      &self.student_discounts,
      &self.fee_payments,
      &self.salaries,
      &self.salary_structures,
      &self.expenses,
      &self.payments,
      &self.leaves,
      &self.student_leaves,
      &self.exam_results,
      &self.timetables,
    ];
    resources.to_vec()
  }
}

struct Binder<'a> {
  transport: &'a Arc<dyn Transport>,
  store: &'a CacheStore,
  relations: &'a Arc<RelationGraph>,
}

impl Binder<'_> {
  fn cache<T: Entity>(&self, base_path: &'static str, id_of: IdFn<T>) -> ResourceCache<T> {
    let service = EntityService::new(Arc::clone(self.transport), base_path, id_of);
    ResourceCache::new(service, self.store.clone(), Arc::clone(self.relations))
  }
}
