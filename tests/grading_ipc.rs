mod test_support;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

fn record_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student: i64,
    course: i64,
    type_id: i64,
    grade: f64,
) -> Value {
    request(
        stdin,
        reader,
        id,
        "assessments.record",
        json!({
            "studentId": student,
            "courseId": course,
            "assessmentTypeId": type_id,
            "grade": grade,
            "date": "2026-02-02"
        }),
    )
}

fn id_of(v: &Value, key: &str) -> i64 {
    v[key].as_i64().unwrap_or_else(|| panic!("{} in {}", key, v))
}

#[test]
fn template_tree_marks_and_final_grades() {
    let workspace = temp_dir("classbook-grading");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let s = &mut stdin;
    let r = &mut reader;

    request_ok(s, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let course = id_of(
        &request_ok(s, r, "2", "courses.create", json!({ "name": "8b Maths" })),
        "courseId",
    );
    let student = id_of(
        &request_ok(
            s,
            r,
            "3",
            "students.create",
            json!({ "firstName": "Mia", "lastName": "Berger" }),
        ),
        "studentId",
    );
    request_ok(s, r, "4", "courses.enroll", json!({ "courseId": course, "studentId": student }));

    assert_eq!(
        request_err(
            s,
            r,
            "5",
            "gradingSystems.create",
            json!({ "name": "broken", "minGrade": 6, "maxGrade": 1, "stepSize": 1 })
        ),
        "bad_params"
    );
    let scale = id_of(
        &request_ok(
            s,
            r,
            "6",
            "gradingSystems.create",
            json!({ "name": "1-6 halves", "minGrade": 1, "maxGrade": 6, "stepSize": 0.5 }),
        ),
        "gradingSystemId",
    );

    let template = id_of(
        &request_ok(
            s,
            r,
            "7",
            "templates.create",
            json!({ "name": "Maths", "gradingSystemId": scale }),
        ),
        "templateId",
    );
    let tests_item = id_of(
        &request_ok(
            s,
            r,
            "8",
            "templates.addItem",
            json!({ "templateId": template, "name": "Tests", "weight": 2 }),
        ),
        "itemId",
    );
    let homework_item = id_of(
        &request_ok(
            s,
            r,
            "9",
            "templates.addItem",
            json!({ "templateId": template, "name": "Homework", "weight": 1 }),
        ),
        "itemId",
    );
    let quiz_item = id_of(
        &request_ok(
            s,
            r,
            "10",
            "templates.addItem",
            json!({ "templateId": template, "name": "Quiz", "parentItemId": tests_item }),
        ),
        "itemId",
    );

    let created = request_ok(
        s,
        r,
        "11",
        "assessmentTypes.fromTemplate",
        json!({ "courseId": course, "templateId": template }),
    );
    let by_item: HashMap<i64, i64> = created["created"]
        .as_array()
        .expect("created")
        .iter()
        .map(|c| (id_of(c, "itemId"), id_of(c, "typeId")))
        .collect();
    assert_eq!(by_item.len(), 3);
    let tests = by_item[&tests_item];
    let homework = by_item[&homework_item];
    let quiz = by_item[&quiz_item];

    let tree = request_ok(s, r, "12", "assessmentTypes.tree", json!({ "courseId": course }));
    let paths: Vec<&str> = tree["types"]
        .as_array()
        .expect("types")
        .iter()
        .map(|t| t["path"].as_str().expect("path"))
        .collect();
    assert_eq!(paths, vec!["Tests", "Tests > Quiz", "Homework"]);

    // No marks yet: the grade is absent, not zero.
    let fin = request_ok(
        s,
        r,
        "13",
        "grades.final",
        json!({ "studentId": student, "courseId": course }),
    );
    assert!(fin["finalGrade"].is_null(), "{}", fin);
    assert!(fin.get("finalGrade").is_some());

    let mut seq = 100;
    let mut record = |s: &mut ChildStdin, r: &mut BufReader<ChildStdout>, type_id: i64, grade: f64| {
        seq += 1;
        record_mark(s, r, &seq.to_string(), student, course, type_id, grade)
    };
    for (type_id, grade) in [(tests, 1.0), (tests, 3.0), (homework, 4.0)] {
        let resp = record(s, r, type_id, grade);
        assert_eq!(resp["ok"], true, "{}", resp);
    }
    let off = record(s, r, tests, 2.25);
    assert_eq!(off["error"]["code"], "grade_out_of_scale");
    assert_eq!(off["error"]["details"]["stepSize"], 0.5);

    // Tests (w2) average 2.0, Homework (w1) 4.0.
    let fin = request_ok(
        s,
        r,
        "20",
        "grades.final",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(fin["finalGrade"], 2.67);
    assert_eq!(fin["mode"], "rollUp");

    // A Quiz mark rolls up into Tests: (2.0 + 5.0) / 2 = 3.5.
    let resp = record(s, r, quiz, 5.0);
    assert_eq!(resp["ok"], true, "{}", resp);
    let fin = request_ok(
        s,
        r,
        "21",
        "grades.final",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(fin["finalGrade"], 3.67);
    let fin = request_ok(
        s,
        r,
        "22",
        "grades.final",
        json!({ "studentId": student, "courseId": course, "mode": "rootOnly" }),
    );
    assert_eq!(fin["finalGrade"], 2.67);

    let by_type = request_ok(
        s,
        r,
        "23",
        "grades.byType",
        json!({ "studentId": student, "courseId": course }),
    );
    let rows = by_type["types"].as_array().expect("types");
    assert_eq!(rows[0]["typeId"], tests);
    assert_eq!(rows[0]["average"], 2.0);
    assert_eq!(rows[0]["markCount"], 2);
    assert_eq!(rows[0]["rolledUpAverage"], 3.5);
    assert_eq!(rows[1]["typeId"], quiz);
    assert_eq!(rows[1]["depth"], 1);

    request_ok(
        s,
        r,
        "24",
        "setup.update",
        json!({ "section": "grading", "patch": { "aggregation": "rootOnly" } }),
    );
    let course_grades = request_ok(s, r, "25", "grades.course", json!({ "courseId": course }));
    assert_eq!(course_grades["mode"], "rootOnly");
    let students = course_grades["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["displayName"], "Berger, Mia");
    assert_eq!(students[0]["finalGrade"], 2.67);
    assert_eq!(students[0]["markCount"], 4);

    // Validation against an explicit scale or through the course link.
    let v = request_ok(
        s,
        r,
        "26",
        "gradingSystems.validate",
        json!({ "gradingSystemId": scale, "grade": 5.5 }),
    );
    assert_eq!(v["valid"], true);
    let v = request_ok(
        s,
        r,
        "27",
        "gradingSystems.validate",
        json!({ "courseId": course, "grade": 6.5 }),
    );
    assert_eq!(v["valid"], false);
    assert_eq!(v["gradingSystemId"], scale);

    // Marks anywhere in the subtree block deletion; the guard counts Quiz too.
    assert_eq!(
        request_err(s, r, "28", "assessmentTypes.delete", json!({ "typeId": tests })),
        "type_in_use"
    );
    assert_eq!(
        request_err(
            s,
            r,
            "29",
            "assessmentTypes.update",
            json!({ "typeId": tests, "patch": { "parentId": quiz } })
        ),
        "cycle"
    );
    let oral = id_of(
        &request_ok(
            s,
            r,
            "30",
            "assessmentTypes.create",
            json!({ "courseId": course, "name": "Oral" }),
        ),
        "typeId",
    );
    let debate = id_of(
        &request_ok(
            s,
            r,
            "31",
            "assessmentTypes.create",
            json!({ "courseId": course, "name": "Debate", "parentId": oral, "weight": 0.5 }),
        ),
        "typeId",
    );
    let deleted = request_ok(s, r, "32", "assessmentTypes.delete", json!({ "typeId": oral }));
    assert_eq!(deleted["deletedIds"], json!([oral, debate]));

    assert_eq!(
        request_err(s, r, "33", "templates.delete", json!({ "templateId": template })),
        "in_use"
    );
    assert_eq!(
        request_err(s, r, "34", "gradingSystems.delete", json!({ "gradingSystemId": scale })),
        "in_use"
    );
}

#[test]
fn lesson_marks_upsert_and_missing_scale() {
    let workspace = temp_dir("classbook-grading-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let s = &mut stdin;
    let r = &mut reader;

    request_ok(s, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let course = id_of(
        &request_ok(s, r, "2", "courses.create", json!({ "name": "Art", "kind": "group" })),
        "courseId",
    );
    let student = id_of(
        &request_ok(
            s,
            r,
            "3",
            "students.create",
            json!({ "firstName": "Jon", "lastName": "Keller" }),
        ),
        "studentId",
    );
    let sketching = id_of(
        &request_ok(
            s,
            r,
            "4",
            "assessmentTypes.create",
            json!({ "courseId": course, "name": "Sketching" }),
        ),
        "typeId",
    );
    let lesson = request_ok(
        s,
        r,
        "5",
        "lessons.create",
        json!({ "courseId": course, "date": "2026-04-14" }),
    )["lessonIds"][0]
        .as_i64()
        .expect("lesson id");

    let mark = json!({
        "studentId": student,
        "courseId": course,
        "assessmentTypeId": sketching,
        "lessonId": lesson,
        "grade": 2.0
    });
    // No template, so no grading scale.
    assert_eq!(
        request_err(s, r, "6", "assessments.record", mark.clone()),
        "no_grading_system"
    );

    let scale = id_of(
        &request_ok(
            s,
            r,
            "7",
            "gradingSystems.create",
            json!({ "name": "points", "minGrade": 0, "maxGrade": 15, "stepSize": 1 }),
        ),
        "gradingSystemId",
    );
    let template = id_of(
        &request_ok(
            s,
            r,
            "8",
            "templates.create",
            json!({ "name": "Empty", "gradingSystemId": scale }),
        ),
        "templateId",
    );
    let created = request_ok(
        s,
        r,
        "9",
        "assessmentTypes.fromTemplate",
        json!({ "courseId": course, "templateId": template }),
    );
    assert_eq!(created["created"], json!([]));

    let first = request_ok(s, r, "10", "assessments.record", mark.clone());
    assert_eq!(first["replaced"], false);
    let mut again = mark.clone();
    again["grade"] = json!(11);
    let second = request_ok(s, r, "11", "assessments.record", again);
    assert_eq!(second["replaced"], true);
    assert_eq!(second["assessmentId"], first["assessmentId"]);

    let listed = request_ok(s, r, "12", "assessments.list", json!({ "courseId": course }));
    let marks = listed["assessments"].as_array().expect("assessments");
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0]["grade"], 11.0);
    assert_eq!(marks[0]["date"], "2026-04-14");

    // Deleting the lesson keeps the mark, detached.
    request_ok(s, r, "13", "lessons.delete", json!({ "lessonId": lesson }));
    let listed = request_ok(s, r, "14", "assessments.list", json!({ "courseId": course }));
    assert_eq!(listed["assessments"][0]["lessonId"], Value::Null);

    let mark_id = first["assessmentId"].as_i64().expect("assessment id");
    request_ok(s, r, "15", "assessments.delete", json!({ "assessmentId": mark_id }));
    assert_eq!(
        request_err(s, r, "16", "assessments.delete", json!({ "assessmentId": mark_id })),
        "not_found"
    );
}
