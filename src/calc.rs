use crate::assessment_types::{get_tree, TypeNode};
use crate::error::CoreResult;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Half-up rounding to two decimals: `floor(100x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// How marks below a root category reach the final grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationMode {
    /// Every node averages its children (by child weight) together with its
    /// own marks, bottom-up.
    #[default]
    RollUp,
    /// A root counts only the marks recorded directly against it.
    RootOnly,
}

impl AggregationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RollUp => "rollUp",
            Self::RootOnly => "rootOnly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rollup" => Some(Self::RollUp),
            "rootonly" => Some(Self::RootOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkValue {
    pub type_id: i64,
    pub grade: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryAverage {
    pub type_id: i64,
    /// Weighted mean of the marks attached to this node itself.
    pub direct: Option<f64>,
    pub mark_count: usize,
    pub rolled_up: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accum {
    sum: f64,
    denom: f64,
    count: usize,
}

impl Accum {
    fn mean(&self) -> Option<f64> {
        if self.denom > 0.0 {
            Some(self.sum / self.denom)
        } else {
            None
        }
    }
}

fn positive_or_one(w: f64) -> f64 {
    if w > 0.0 {
        w
    } else {
        1.0
    }
}

/// Per-node averages for `nodes` (pre-order, as returned by the tree query).
pub fn category_averages(nodes: &[TypeNode], marks: &[MarkValue]) -> Vec<CategoryAverage> {
    let mut direct: HashMap<i64, Accum> = HashMap::new();
    for m in marks {
        let w = positive_or_one(m.weight);
        let entry = direct.entry(m.type_id).or_default();
        entry.sum += m.grade * w;
        entry.denom += w;
        entry.count += 1;
    }

    let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
    for (i, n) in nodes.iter().enumerate() {
        if let Some(p) = n.parent_id {
            children.entry(p).or_default().push(i);
        }
    }

    // Reverse pre-order visits every child before its parent.
    let mut rolled: Vec<Option<f64>> = vec![None; nodes.len()];
    for i in (0..nodes.len()).rev() {
        let node = &nodes[i];
        let own = direct.get(&node.id).and_then(Accum::mean);
        let mut sum = 0.0_f64;
        let mut denom = 0.0_f64;
        let mut contributing = 0_usize;
        if let Some(kids) = children.get(&node.id) {
            for &c in kids {
                if let Some(avg) = rolled[c] {
                    let w = positive_or_one(nodes[c].weight);
                    sum += avg * w;
                    denom += w;
                    contributing += 1;
                }
            }
        }
        rolled[i] = if contributing == 0 {
            own
        } else {
            // Own marks weigh like an average contributing child.
            if let Some(own) = own {
                let w = denom / contributing as f64;
                sum += own * w;
                denom += w;
            }
            Some(sum / denom)
        };
    }

    nodes
        .iter()
        .zip(rolled)
        .map(|(node, rolled_up)| {
            let acc = direct.get(&node.id).copied().unwrap_or_default();
            CategoryAverage {
                type_id: node.id,
                direct: acc.mean(),
                mark_count: acc.count,
                rolled_up,
            }
        })
        .collect()
}

/// Weighted mean over the roots that have a value, rounded to two decimals.
/// Roots without marks are left out of numerator and denominator alike.
pub fn combine_roots(
    nodes: &[TypeNode],
    averages: &[CategoryAverage],
    mode: AggregationMode,
) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (node, avg) in nodes.iter().zip(averages) {
        if node.parent_id.is_some() {
            continue;
        }
        let value = match mode {
            AggregationMode::RollUp => avg.rolled_up,
            AggregationMode::RootOnly => avg.direct,
        };
        if let Some(v) = value {
            let w = positive_or_one(node.weight);
            sum += v * w;
            denom += w;
        }
    }
    if denom > 0.0 {
        Some(round_off_2_decimals(sum / denom))
    } else {
        None
    }
}

fn load_marks(conn: &Connection, student_id: i64, course_id: i64) -> CoreResult<Vec<MarkValue>> {
    let mut stmt = conn.prepare(
        "SELECT assessment_type_id, grade, weight
         FROM assessments
         WHERE student_id = ? AND course_id = ?",
    )?;
    let marks = stmt
        .query_map([student_id, course_id], |r| {
            Ok(MarkValue {
                type_id: r.get(0)?,
                grade: r.get(1)?,
                weight: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

/// A student's final grade for a course, `None` when there is nothing to
/// grade (no marks, or none that reach a root under `mode`).
pub fn final_grade(
    conn: &Connection,
    student_id: i64,
    course_id: i64,
    mode: AggregationMode,
) -> CoreResult<Option<f64>> {
    crate::students::ensure_student_exists(conn, student_id)?;
    let nodes = get_tree(conn, course_id)?;
    let marks = load_marks(conn, student_id, course_id)?;
    if marks.is_empty() {
        return Ok(None);
    }
    let averages = category_averages(&nodes, &marks);
    Ok(combine_roots(&nodes, &averages, mode))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeGrade {
    pub type_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub depth: i64,
    pub path: String,
    pub weight: f64,
    pub average: Option<f64>,
    pub mark_count: usize,
    pub rolled_up_average: Option<f64>,
}

/// Display view over the whole tree: every node with its direct average,
/// mark count and rolled-up average.
pub fn assessment_type_grades(
    conn: &Connection,
    student_id: i64,
    course_id: i64,
) -> CoreResult<Vec<TypeGrade>> {
    crate::students::ensure_student_exists(conn, student_id)?;
    let nodes = get_tree(conn, course_id)?;
    let marks = load_marks(conn, student_id, course_id)?;
    let averages = category_averages(&nodes, &marks);
    Ok(nodes
        .into_iter()
        .zip(averages)
        .map(|(node, avg)| TypeGrade {
            type_id: node.id,
            name: node.name,
            parent_id: node.parent_id,
            depth: node.depth,
            path: node.path,
            weight: node.weight,
            average: avg.direct.map(round_off_2_decimals),
            mark_count: avg.mark_count,
            rolled_up_average: avg.rolled_up.map(round_off_2_decimals),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub student_id: i64,
    pub display_name: String,
    pub final_grade: Option<f64>,
    pub mark_count: usize,
}

/// Final grades of every enrolled student.
pub fn course_grades(
    conn: &Connection,
    course_id: i64,
    mode: AggregationMode,
) -> CoreResult<Vec<StudentGrade>> {
    let roster = crate::students::course_students(conn, course_id)?;
    let nodes = get_tree(conn, course_id)?;

    let mut by_student: HashMap<i64, Vec<MarkValue>> = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT student_id, assessment_type_id, grade, weight
         FROM assessments
         WHERE course_id = ?",
    )?;
    let rows = stmt.query_map([course_id], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            MarkValue {
                type_id: r.get(1)?,
                grade: r.get(2)?,
                weight: r.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (student_id, mark) = row?;
        by_student.entry(student_id).or_default().push(mark);
    }

    Ok(roster
        .into_iter()
        .map(|s| {
            let marks = by_student.remove(&s.id).unwrap_or_default();
            let final_grade = if marks.is_empty() {
                None
            } else {
                combine_roots(&nodes, &category_averages(&nodes, &marks), mode)
            };
            StudentGrade {
                student_id: s.id,
                display_name: s.display_name(),
                final_grade,
                mark_count: marks.len(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: Option<i64>, weight: f64) -> TypeNode {
        TypeNode {
            id,
            course_id: 1,
            name: format!("t{}", id),
            parent_id,
            weight,
            depth: if parent_id.is_some() { 1 } else { 0 },
            path: String::new(),
        }
    }

    fn m(type_id: i64, grade: f64) -> MarkValue {
        MarkValue {
            type_id,
            grade,
            weight: 1.0,
        }
    }

    fn final_of(nodes: &[TypeNode], marks: &[MarkValue], mode: AggregationMode) -> Option<f64> {
        combine_roots(nodes, &category_averages(nodes, marks), mode)
    }

    #[test]
    fn round_off_is_half_up() {
        assert_eq!(round_off_2_decimals(2.666_666), 2.67);
        assert_eq!(round_off_2_decimals(2.0), 2.0);
        assert_eq!(round_off_2_decimals(1.234), 1.23);
    }

    #[test]
    fn two_weighted_roots() {
        // Tests (weight 2) average 2.0, Homework (weight 1) average 4.0.
        let nodes = vec![node(1, None, 2.0), node(2, None, 1.0)];
        let marks = vec![m(1, 1.0), m(1, 3.0), m(2, 4.0)];
        for mode in [AggregationMode::RollUp, AggregationMode::RootOnly] {
            assert_eq!(final_of(&nodes, &marks, mode), Some(2.67));
        }
    }

    #[test]
    fn roots_without_marks_do_not_count() {
        let nodes = vec![node(1, None, 2.0), node(2, None, 1.0)];
        assert_eq!(final_of(&nodes, &[m(2, 4.0)], AggregationMode::RollUp), Some(4.0));
        assert_eq!(final_of(&nodes, &[], AggregationMode::RollUp), None);
    }

    #[test]
    fn second_mark_moves_only_its_category() {
        let nodes = vec![node(1, None, 2.0), node(2, None, 1.0)];
        let before = category_averages(&nodes, &[m(1, 2.0), m(2, 4.0)]);
        let after = category_averages(&nodes, &[m(1, 2.0), m(1, 3.0), m(2, 4.0)]);
        assert_eq!(before[0].direct, Some(2.0));
        assert_eq!(after[0].direct, Some(2.5));
        assert_eq!(before[1], after[1]);
    }

    #[test]
    fn per_mark_weight_overrides_plain_mean() {
        let nodes = vec![node(1, None, 1.0)];
        let marks = vec![
            m(1, 2.0),
            MarkValue {
                type_id: 1,
                grade: 5.0,
                weight: 2.0,
            },
        ];
        assert_eq!(final_of(&nodes, &marks, AggregationMode::RollUp), Some(4.0));
    }

    #[test]
    fn roll_up_blends_children_and_own_marks() {
        // Tests(w2) > Quiz(w1), Exam(w3); Homework(w1). Pre-order.
        let nodes = vec![
            node(1, None, 2.0),
            node(3, Some(1), 1.0),
            node(4, Some(1), 3.0),
            node(2, None, 1.0),
        ];
        let marks = vec![m(3, 2.0), m(4, 4.0), m(1, 1.0), m(2, 3.0)];
        let avgs = category_averages(&nodes, &marks);
        // Children: (2*1 + 4*3) / 4 = 3.5; own mark 1.0 weighs 2 (mean child weight).
        let tests = avgs[0].rolled_up.unwrap();
        assert!((tests - 16.0 / 6.0).abs() < 1e-9);
        assert_eq!(avgs[0].direct, Some(1.0));
        assert_eq!(combine_roots(&nodes, &avgs, AggregationMode::RollUp), Some(2.78));
        assert_eq!(combine_roots(&nodes, &avgs, AggregationMode::RootOnly), Some(1.67));
    }

    #[test]
    fn root_only_ignores_descendant_marks() {
        let nodes = vec![node(1, None, 1.0), node(2, Some(1), 1.0)];
        let marks = vec![m(2, 3.0)];
        assert_eq!(final_of(&nodes, &marks, AggregationMode::RootOnly), None);
        assert_eq!(final_of(&nodes, &marks, AggregationMode::RollUp), Some(3.0));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(AggregationMode::parse("RollUp"), Some(AggregationMode::RollUp));
        assert_eq!(AggregationMode::parse("rootonly"), Some(AggregationMode::RootOnly));
        assert_eq!(AggregationMode::parse("mean"), None);
        assert_eq!(AggregationMode::default().as_str(), "rollUp");
    }

    #[test]
    fn student_without_marks_has_no_final_grade() {
        let conn = crate::db::open_in_memory().unwrap();
        conn.execute("INSERT INTO courses(name, kind) VALUES('8c Maths', 'class')", [])
            .unwrap();
        conn.execute("INSERT INTO students(first_name, last_name) VALUES('Ana', 'Berg')", [])
            .unwrap();
        let tests = crate::assessment_types::add_type(&conn, 1, "Tests", None, 1.0).unwrap();

        for mode in [AggregationMode::RollUp, AggregationMode::RootOnly] {
            assert_eq!(final_grade(&conn, 1, 1, mode).unwrap(), None);
        }
        let view = assessment_type_grades(&conn, 1, 1).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].mark_count, 0);
        assert_eq!(view[0].average, None);

        conn.execute(
            "INSERT INTO assessments(student_id, course_id, assessment_type_id, grade, date)
             VALUES(1, 1, ?, 2.5, '2026-03-02')",
            [tests],
        )
        .unwrap();
        assert_eq!(final_grade(&conn, 1, 1, AggregationMode::RollUp).unwrap(), Some(2.5));
        let e = final_grade(&conn, 99, 1, AggregationMode::RollUp).unwrap_err();
        assert_eq!(e.code, "not_found");
    }
}
