use crate::error::{CoreError, CoreResult};
use crate::lessons::id_placeholders;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Separator of the materialized ancestry path ("Tests > Vocabulary Quiz").
pub const PATH_SEPARATOR: &str = " > ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentType {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub weight: f64,
}

/// A tree node annotated with its depth (roots are 0) and ancestry path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeNode {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub weight: f64,
    pub depth: i64,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct TypePatch {
    pub name: Option<String>,
    pub weight: Option<f64>,
    /// `Some(None)` makes the node a root.
    pub parent_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub grading_system_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateItem {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub parent_item_id: Option<i64>,
    pub weight: f64,
}

fn node_name(raw: &str) -> CoreResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("name must not be empty"));
    }
    Ok(name.to_string())
}

fn positive_weight(weight: f64) -> CoreResult<f64> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(CoreError::bad_params("weight must be > 0")
            .with_details(json!({ "weight": weight })));
    }
    Ok(weight)
}

fn type_from_row(r: &Row<'_>) -> rusqlite::Result<AssessmentType> {
    Ok(AssessmentType {
        id: r.get(0)?,
        course_id: r.get(1)?,
        name: r.get(2)?,
        parent_id: r.get(3)?,
        weight: r.get(4)?,
    })
}

pub fn get_type(conn: &Connection, type_id: i64) -> CoreResult<AssessmentType> {
    conn.query_row(
        "SELECT id, course_id, name, parent_id, weight FROM assessment_types WHERE id = ?",
        [type_id],
        type_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("assessment type", type_id))
}

fn parent_in_course(conn: &Connection, parent_id: i64, course_id: i64) -> CoreResult<()> {
    let parent = get_type(conn, parent_id)?;
    if parent.course_id != course_id {
        return Err(CoreError::validation(
            "parent_course_mismatch",
            "parent assessment type belongs to another course",
        )
        .with_details(json!({
            "parentId": parent_id,
            "parentCourseId": parent.course_id,
            "courseId": course_id,
        })));
    }
    Ok(())
}

pub fn add_type(
    conn: &Connection,
    course_id: i64,
    name: &str,
    parent_id: Option<i64>,
    weight: f64,
) -> CoreResult<i64> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let name = node_name(name)?;
    let weight = positive_weight(weight)?;
    if let Some(parent_id) = parent_id {
        parent_in_course(conn, parent_id, course_id)?;
    }
    conn.execute(
        "INSERT INTO assessment_types(course_id, name, parent_id, weight) VALUES(?, ?, ?, ?)",
        (course_id, &name, parent_id, weight),
    )
    .map_err(|e| {
        CoreError::storage("db_insert_failed", e)
            .with_details(json!({ "table": "assessment_types" }))
    })?;
    Ok(conn.last_insert_rowid())
}

/// The node and all of its descendants.
pub fn subtree_ids(conn: &Connection, type_id: i64) -> CoreResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE sub(id) AS (
            SELECT id FROM assessment_types WHERE id = ?
            UNION ALL
            SELECT t.id FROM assessment_types t JOIN sub ON t.parent_id = sub.id
         )
         SELECT id FROM sub ORDER BY id",
    )?;
    let ids = stmt
        .query_map([type_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn update_type(conn: &Connection, type_id: i64, patch: &TypePatch) -> CoreResult<()> {
    let current = get_type(conn, type_id)?;
    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(name) = &patch.name {
        fields.push("name = ?");
        values.push(Value::Text(node_name(name)?));
    }
    if let Some(weight) = patch.weight {
        fields.push("weight = ?");
        values.push(Value::Real(positive_weight(weight)?));
    }
    if let Some(parent) = patch.parent_id {
        if let Some(parent_id) = parent {
            parent_in_course(conn, parent_id, current.course_id)?;
            if subtree_ids(conn, type_id)?.contains(&parent_id) {
                return Err(CoreError::validation(
                    "cycle",
                    "an assessment type cannot be moved below itself",
                )
                .with_details(json!({ "typeId": type_id, "parentId": parent_id })));
            }
        }
        fields.push("parent_id = ?");
        values.push(parent.map(Value::Integer).unwrap_or(Value::Null));
    }
    if fields.is_empty() {
        return Ok(());
    }
    values.push(Value::Integer(type_id));
    let sql = format!("UPDATE assessment_types SET {} WHERE id = ?", fields.join(", "));
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| CoreError::storage("db_update_failed", e))?;
    Ok(())
}

/// All nodes of a course in pre-order: a parent always comes before its
/// descendants, siblings by id.
pub fn get_tree(conn: &Connection, course_id: i64) -> CoreResult<Vec<TypeNode>> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let mut stmt = conn.prepare(
        "WITH RECURSIVE tree(id, course_id, name, parent_id, weight, depth, path, sort_path) AS (
            SELECT id, course_id, name, parent_id, weight, 0, name, printf('%010d', id)
            FROM assessment_types
            WHERE course_id = ? AND parent_id IS NULL
            UNION ALL
            SELECT t.id, t.course_id, t.name, t.parent_id, t.weight, tree.depth + 1,
                   tree.path || ? || t.name,
                   tree.sort_path || '/' || printf('%010d', t.id)
            FROM assessment_types t
            JOIN tree ON t.parent_id = tree.id
         )
         SELECT id, course_id, name, parent_id, weight, depth, path
         FROM tree
         ORDER BY sort_path",
    )?;
    let nodes = stmt
        .query_map((course_id, PATH_SEPARATOR), |r| {
            Ok(TypeNode {
                id: r.get(0)?,
                course_id: r.get(1)?,
                name: r.get(2)?,
                parent_id: r.get(3)?,
                weight: r.get(4)?,
                depth: r.get(5)?,
                path: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Deletes a never-used node together with its descendants.
///
/// Refused with `type_in_use` when any mark references the node or anything
/// below it.
pub fn delete_type(conn: &Connection, type_id: i64) -> CoreResult<Vec<i64>> {
    get_type(conn, type_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let ids = subtree_ids(&tx, type_id)?;
    let placeholders = id_placeholders(ids.len());
    let bind: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();

    let marks: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM assessments WHERE assessment_type_id IN ({})",
            placeholders
        ),
        params_from_iter(bind.iter()),
        |r| r.get(0),
    )?;
    if marks > 0 {
        return Err(CoreError::validation(
            "type_in_use",
            "assessment type has recorded marks and cannot be deleted",
        )
        .with_details(json!({ "typeId": type_id, "marks": marks, "subtree": ids })));
    }

    tx.execute(
        &format!("DELETE FROM assessment_types WHERE id IN ({})", placeholders),
        params_from_iter(bind.iter()),
    )
    .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    tracing::info!(type_id, deleted = ids.len(), "assessment type subtree deleted");
    Ok(ids)
}

fn template_from_row(r: &Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        grading_system_id: r.get(3)?,
    })
}

pub fn create_template(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    grading_system_id: Option<i64>,
) -> CoreResult<i64> {
    let name = node_name(name)?;
    if let Some(scale_id) = grading_system_id {
        crate::scale::get_scale(conn, scale_id)?;
    }
    conn.execute(
        "INSERT INTO assessment_type_templates(name, description, grading_system_id) VALUES(?, ?, ?)",
        (&name, description, grading_system_id),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_templates(conn: &Connection) -> CoreResult<Vec<Template>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, grading_system_id
         FROM assessment_type_templates
         ORDER BY name, id",
    )?;
    let templates = stmt
        .query_map([], template_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(templates)
}

pub fn get_template(conn: &Connection, template_id: i64) -> CoreResult<Template> {
    conn.query_row(
        "SELECT id, name, description, grading_system_id FROM assessment_type_templates WHERE id = ?",
        [template_id],
        template_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("template", template_id))
}

pub fn delete_template(conn: &Connection, template_id: i64) -> CoreResult<()> {
    get_template(conn, template_id)?;
    let courses: i64 = conn.query_row(
        "SELECT COUNT(*) FROM courses WHERE template_id = ?",
        [template_id],
        |r| r.get(0),
    )?;
    if courses > 0 {
        return Err(CoreError::validation("in_use", "template is linked to courses")
            .with_details(json!({ "templateId": template_id, "courses": courses })));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM assessment_type_template_items WHERE template_id = ?",
        [template_id],
    )
    .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    tx.execute(
        "DELETE FROM assessment_type_templates WHERE id = ?",
        [template_id],
    )
    .map_err(|e| CoreError::storage("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;
    Ok(())
}

pub fn template_items(conn: &Connection, template_id: i64) -> CoreResult<Vec<TemplateItem>> {
    get_template(conn, template_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, template_id, name, parent_item_id, weight
         FROM assessment_type_template_items
         WHERE template_id = ?
         ORDER BY id",
    )?;
    let items = stmt
        .query_map([template_id], |r| {
            Ok(TemplateItem {
                id: r.get(0)?,
                template_id: r.get(1)?,
                name: r.get(2)?,
                parent_item_id: r.get(3)?,
                weight: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn add_template_item(
    conn: &Connection,
    template_id: i64,
    name: &str,
    parent_item_id: Option<i64>,
    weight: f64,
) -> CoreResult<i64> {
    get_template(conn, template_id)?;
    let name = node_name(name)?;
    let weight = positive_weight(weight)?;
    if let Some(parent_item_id) = parent_item_id {
        let parent_template: Option<i64> = conn
            .query_row(
                "SELECT template_id FROM assessment_type_template_items WHERE id = ?",
                [parent_item_id],
                |r| r.get(0),
            )
            .optional()?;
        match parent_template {
            None => return Err(CoreError::not_found("template item", parent_item_id)),
            Some(t) if t != template_id => {
                return Err(CoreError::bad_params("parent item belongs to another template")
                    .with_details(json!({ "parentItemId": parent_item_id, "templateId": t })));
            }
            Some(_) => {}
        }
    }
    conn.execute(
        "INSERT INTO assessment_type_template_items(template_id, name, parent_item_id, weight)
         VALUES(?, ?, ?, ?)",
        (template_id, &name, parent_item_id, weight),
    )
    .map_err(|e| CoreError::storage("db_insert_failed", e))?;
    Ok(conn.last_insert_rowid())
}

/// Copies a template's item forest into the course and links the course to
/// the template. Template item ids are remapped to the new type ids; a parent
/// is always created before its children.
///
/// Returns `(template_item_id, assessment_type_id)` pairs in creation order.
pub fn create_from_template(
    conn: &Connection,
    course_id: i64,
    template_id: i64,
) -> CoreResult<Vec<(i64, i64)>> {
    crate::courses::ensure_course_exists(conn, course_id)?;
    let items = template_items(conn, template_id)?;
    let known: HashSet<i64> = items.iter().map(|i| i.id).collect();
    if let Some(orphan) = items
        .iter()
        .find(|i| i.parent_item_id.is_some_and(|p| !known.contains(&p)))
    {
        return Err(CoreError::bad_params("template item has a parent outside the template")
            .with_details(json!({ "itemId": orphan.id, "parentItemId": orphan.parent_item_id })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CoreError::storage("db_tx_failed", e))?;
    let mut new_ids: HashMap<i64, i64> = HashMap::new();
    let mut created: Vec<(i64, i64)> = Vec::with_capacity(items.len());
    let mut pending: Vec<&TemplateItem> = items.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for item in pending {
            let parent = match item.parent_item_id {
                None => None,
                Some(p) => match new_ids.get(&p) {
                    Some(id) => Some(*id),
                    None => {
                        waiting.push(item);
                        continue;
                    }
                },
            };
            tx.execute(
                "INSERT INTO assessment_types(course_id, name, parent_id, weight) VALUES(?, ?, ?, ?)",
                (course_id, &item.name, parent, item.weight),
            )
            .map_err(|e| CoreError::storage("db_insert_failed", e))?;
            let type_id = tx.last_insert_rowid();
            new_ids.insert(item.id, type_id);
            created.push((item.id, type_id));
        }
        if waiting.len() == before {
            let stuck: Vec<i64> = waiting.iter().map(|i| i.id).collect();
            return Err(CoreError::validation("cycle", "template items form a cycle")
                .with_details(json!({ "templateId": template_id, "itemIds": stuck })));
        }
        pending = waiting;
    }

    tx.execute(
        "UPDATE courses SET template_id = ? WHERE id = ?",
        [template_id, course_id],
    )
    .map_err(|e| CoreError::storage("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| CoreError::storage("db_commit_failed", e))?;

    tracing::info!(course_id, template_id, types = created.len(), "assessment types created from template");
    Ok(created)
}
