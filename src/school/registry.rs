//! Available resources and lookup by name or alias.

use crate::cache::ResourceName;

use super::models::*;

#[derive(Debug, Clone)]
pub struct ResourceDef {
  pub name: ResourceName,
  /// Base path of the resource's endpoints
  pub path: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All resources the console can browse
pub const RESOURCES: &[ResourceDef] = &[
  ResourceDef {
    name: STUDENTS,
    path: "/students",
    aliases: &["student", "pupils"],
    description: "Enrolled students",
  },
  ResourceDef {
    name: STAFF,
    path: "/staff",
    aliases: &["teachers", "employees"],
    description: "Teaching and support staff",
  },
  ResourceDef {
    name: FEE_CATEGORIES,
    path: "/fee-categories",
    aliases: &["fee-categories", "categories"],
    description: "Kinds of fees (tuition, transport, ...)",
  },
  ResourceDef {
    name: FEE_STRUCTURES,
    path: "/fee-structures",
    aliases: &["fee-structures", "structures"],
    description: "Fee amounts per class and year",
  },
  ResourceDef {
    name: STUDENT_FEES,
    path: "/student-fees",
    aliases: &["student-fees", "fees"],
    description: "Fees charged to students",
  },
  ResourceDef {
    name: STUDENT_DISCOUNTS,
    path: "/student-discounts",
    aliases: &["student-discounts", "discounts"],
    description: "Discounts granted to students",
  },
  ResourceDef {
    name: FEE_PAYMENTS,
    path: "/fee-payments",
    aliases: &["fee-payments", "receipts"],
    description: "Payments against student fees",
  },
  ResourceDef {
    name: SALARIES,
    path: "/salaries",
    aliases: &["salary", "payroll"],
    description: "Monthly staff salaries",
  },
  ResourceDef {
    name: SALARY_STRUCTURES,
    path: "/salary-structures",
    aliases: &["salary-structures"],
    description: "Salary components per staff member",
  },
  ResourceDef {
    name: EXPENSES,
    path: "/expenses",
    aliases: &["expense"],
    description: "School expenses",
  },
  ResourceDef {
    name: PAYMENTS,
    path: "/payments",
    aliases: &["payment"],
    description: "Outgoing payments",
  },
  ResourceDef {
    name: LEAVES,
    path: "/leaves",
    aliases: &["leave", "staff-leaves"],
    description: "Staff leave requests",
  },
  ResourceDef {
    name: STUDENT_LEAVES,
    path: "/student-leaves",
    aliases: &["student-leaves", "absences"],
    description: "Student leave requests",
  },
  ResourceDef {
    name: EXAM_RESULTS,
    path: "/exam-results",
    aliases: &["exam-results", "results", "marks"],
    description: "Exam results",
  },
  ResourceDef {
    name: TIMETABLES,
    path: "/timetables",
    aliases: &["timetable", "schedule"],
    description: "Class timetables",
  },
];

/// Get resources matching the given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static ResourceDef> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return RESOURCES.iter().collect();
  }

  let mut matches: Vec<(&ResourceDef, u32)> = Vec::new();

  for def in RESOURCES {
    let name = def.name.to_lowercase();

    // Exact match on name
    if name == input_lower {
      matches.push((def, 0));
      continue;
    }

    // Exact match on alias
    if def.aliases.contains(&input_lower.as_str()) {
      matches.push((def, 1));
      continue;
    }

    // Prefix match on name
    if name.starts_with(&input_lower) {
      matches.push((def, 2));
      continue;
    }

    // Prefix match on alias
    if def.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((def, 3));
      continue;
    }

    // Fuzzy match (contains)
    if name.contains(&input_lower) {
      matches.push((def, 4));
      continue;
    }

    if def.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((def, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(def, _)| def).collect()
}

/// Best match for `input`, if any.
pub fn find_resource(input: &str) -> Option<&'static ResourceDef> {
  get_suggestions(input).into_iter().next()
}

/// Resource whose name or one of its aliases is exactly `input`
/// (case-insensitive). Commands that act on data only accept these.
pub fn find_exact(input: &str) -> Option<&'static ResourceDef> {
  let input_lower = input.to_lowercase();
  RESOURCES.iter().find(|def| {
    def.name.to_lowercase() == input_lower || def.aliases.contains(&input_lower.as_str())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), RESOURCES.len());
  }

  #[test]
  fn test_exact_match() {
    assert_eq!(find_resource("studentFees").map(|d| d.name), Some(STUDENT_FEES));
    assert_eq!(find_resource("staff").map(|d| d.name), Some(STAFF));
  }

  #[test]
  fn test_alias_match() {
    assert_eq!(find_resource("fee-payments").map(|d| d.name), Some(FEE_PAYMENTS));
    assert_eq!(find_resource("discounts").map(|d| d.name), Some(STUDENT_DISCOUNTS));
  }

  #[test]
  fn test_prefix_match() {
    let suggestions = get_suggestions("fee");
    assert!(suggestions.len() >= 3);
    assert!(suggestions[..3].iter().all(|d| d.name.starts_with("fee")));
  }

  #[test]
  fn test_exact_lookup_does_not_guess() {
    assert_eq!(find_exact("FeePayments").map(|d| d.name), Some(FEE_PAYMENTS));
    assert_eq!(find_exact("discounts").map(|d| d.name), Some(STUDENT_DISCOUNTS));
    assert!(find_exact("fee").is_none());
    assert!(find_exact("pay").is_none());
    assert!(!get_suggestions("pay").is_empty());
  }

  #[test]
  fn test_no_match() {
    assert!(find_resource("xyz").is_none());
  }

  #[test]
  fn test_names_and_paths_are_unique() {
    let names: HashSet<_> = RESOURCES.iter().map(|d| d.name).collect();
    let paths: HashSet<_> = RESOURCES.iter().map(|d| d.path).collect();
    assert_eq!(names.len(), RESOURCES.len());
    assert_eq!(paths.len(), RESOURCES.len());
  }
}
