//! Query evaluation with `$$links` joins.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use deck_schema::{
    compare_values, get_path, merge_into, CompiledQuery, LinkQuery, MAX_LINK_DEPTH,
};
use deck_types::Element;
use serde_json::{Map, Value};
use tracing::trace;

use crate::graph::GraphSource;
use crate::options::{LinkOptions, QueryOptions, SortDirection};

/// Evaluate `query` against `candidates` and return the sorted, paginated,
/// projected results.
pub fn run_query<'a, G, I>(
    graph: &G,
    query: &CompiledQuery,
    candidates: I,
    options: &QueryOptions,
) -> Vec<Value>
where
    G: GraphSource + ?Sized,
    I: IntoIterator<Item = &'a Element>,
{
    if options.limit == Some(0) || query.matches_nothing() {
        return Vec::new();
    }
    let matched: Vec<(Value, Value)> = candidates
        .into_iter()
        .filter_map(|element| {
            evaluate_at(graph, query, element, &options.links, 0)
                .map(|projected| (element.to_value(), projected))
        })
        .collect();
    trace!(matched = matched.len(), "query evaluated");
    paginate(matched, &options.sort_by, options.sort_dir, options.skip, options.limit)
}

/// Evaluate `query` against one element. Returns the projected element with
/// its resolved links, or `None` if the element does not match, including
/// when a `$$links` verb has no matching related element.
pub fn evaluate<G: GraphSource + ?Sized>(
    graph: &G,
    query: &CompiledQuery,
    element: &Element,
    link_options: &BTreeMap<String, LinkOptions>,
) -> Option<Value> {
    evaluate_at(graph, query, element, link_options, 0)
}

fn evaluate_at<G: GraphSource + ?Sized>(
    graph: &G,
    query: &CompiledQuery,
    element: &Element,
    link_options: &BTreeMap<String, LinkOptions>,
    depth: usize,
) -> Option<Value> {
    if depth > MAX_LINK_DEPTH {
        return None;
    }
    let value = element.to_value();
    if !query.predicate.evaluate(&value) {
        return None;
    }

    if !query.alternatives.is_empty() {
        let mut result: Option<Value> = None;
        for alternative in &query.alternatives {
            if let Some(projected) = evaluate_at(graph, alternative, element, link_options, depth) {
                result = Some(match result.take() {
                    Some(mut acc) => {
                        merge_into(&mut acc, projected);
                        acc
                    }
                    None => projected,
                });
            }
        }
        return result;
    }

    let mut projected = query.projection.apply(&value);
    if query.links.is_empty() {
        return Some(projected);
    }

    let mut resolved = Map::new();
    for (verb, plan) in &query.links {
        let related = resolve_verb(graph, element, verb, plan, depth);
        if related.is_empty() {
            return None;
        }
        let options = link_options.get(verb).cloned().unwrap_or_default();
        let page = paginate(
            related,
            &options.sort_by,
            options.sort_dir,
            options.skip,
            options.limit,
        );
        resolved.insert(verb.clone(), Value::Array(page));
    }
    if let Value::Object(map) = &mut projected {
        merge_into(
            map.entry("links").or_insert_with(|| Value::Object(Map::new())),
            Value::Object(resolved),
        );
    }
    Some(projected)
}

/// Related elements of `element` under `verb` that satisfy `plan`, as
/// `(full value, projected value)` pairs.
fn resolve_verb<G: GraphSource + ?Sized>(
    graph: &G,
    element: &Element,
    verb: &str,
    plan: &LinkQuery,
    depth: usize,
) -> Vec<(Value, Value)> {
    let no_options = BTreeMap::new();
    let mut related = Vec::new();
    for edge in graph.edges(&element.id, verb) {
        let Some(mut target) = graph.element(&edge.target) else {
            trace!(verb, target = %edge.target, "dangling link edge");
            continue;
        };
        target.linked_at.insert(verb.to_string(), edge.created_at);
        let projected = match plan {
            LinkQuery::Attached => Some(target.to_value()),
            LinkQuery::Nested(sub) => evaluate_at(graph, sub, &target, &no_options, depth + 1),
        };
        if let Some(mut projected) = projected {
            stamp_linked_at(&mut projected, verb, &target);
            related.push((target.to_value(), projected));
        }
    }
    related
}

/// Every resolved related element carries `linked_at[verb]`, even when its
/// projection does not select `linked_at`.
fn stamp_linked_at(projected: &mut Value, verb: &str, target: &Element) {
    let (Value::Object(map), Some(at)) = (projected, target.linked_at.get(verb)) else {
        return;
    };
    let Ok(at) = serde_json::to_value(at) else {
        return;
    };
    let mut stamp = Map::new();
    stamp.insert(verb.to_string(), at);
    merge_into(
        map.entry("linked_at").or_insert_with(|| Value::Object(Map::new())),
        Value::Object(stamp),
    );
}

fn compare_by_path(a: &Value, b: &Value, path: &[String]) -> Ordering {
    match (get_path(a, path), get_path(b, path)) {
        (Some(x), Some(y)) => compare_values(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort `(full, projected)` pairs by `sort_by` over the full values, then
/// apply `skip`, then `limit`, and return the projected values.
///
/// Ascending order puts elements missing the sort key last, descending
/// order puts them first. Ties keep their input order.
pub fn paginate(
    mut items: Vec<(Value, Value)>,
    sort_by: &[String],
    dir: SortDirection,
    skip: usize,
    limit: Option<usize>,
) -> Vec<Value> {
    if !sort_by.is_empty() {
        items.sort_by(|(a, _), (b, _)| {
            let order = compare_by_path(a, b, sort_by);
            match dir {
                SortDirection::Asc => order,
                SortDirection::Desc => order.reverse(),
            }
        });
    }
    items
        .into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(_, projected)| projected)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LinkEdge, LinkIndex};
    use chrono::{TimeZone, Utc};
    use deck_schema::{compile, Schema};
    use deck_types::ElementId;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestGraph {
        elements: HashMap<ElementId, Element>,
        order: Vec<ElementId>,
        index: LinkIndex,
    }

    impl TestGraph {
        fn add(&mut self, slug: &str, element_type: &str, data: Value) -> ElementId {
            let element = Element {
                id: ElementId::new(),
                slug: slug.to_string(),
                version: "1.0.0".to_string(),
                element_type: element_type.to_string(),
                name: None,
                active: true,
                tags: vec![],
                markers: vec![],
                requires: vec![],
                capabilities: vec![],
                data,
                links: BTreeMap::new(),
                linked_at: BTreeMap::new(),
                created_at: Utc::now(),
                updated_at: None,
            };
            let id = element.id;
            self.order.push(id);
            self.elements.insert(id, element);
            id
        }

        fn link(&mut self, from: ElementId, verb: &str, to: ElementId, inverse: &str, millis: i64) -> ElementId {
            let from_type = self.elements[&from].element_type.clone();
            let to_type = self.elements[&to].element_type.clone();
            let id = self.add(
                &format!("link-{}", ElementId::new()),
                "link@1.0.0",
                json!({
                    "from": { "id": from, "type": from_type },
                    "to": { "id": to, "type": to_type },
                    "inverseName": inverse
                }),
            );
            let link = self.elements.get_mut(&id).unwrap();
            link.name = Some(verb.to_string());
            link.created_at = Utc.timestamp_millis_opt(millis).unwrap();
            let link = link.clone();
            self.index.upsert(&link);
            id
        }

        fn run(&self, schema: Value, options: &QueryOptions) -> Vec<Value> {
            let query = compile(&Schema::parse(&schema).unwrap()).unwrap();
            let candidates: Vec<&Element> = self.order.iter().map(|id| &self.elements[id]).collect();
            run_query(self, &query, candidates, options)
        }
    }

    impl GraphSource for TestGraph {
        fn element(&self, id: &ElementId) -> Option<Element> {
            self.elements.get(id).cloned()
        }

        fn edges(&self, from: &ElementId, verb: &str) -> Vec<LinkEdge> {
            self.index.edges(from, verb).to_vec()
        }
    }

    fn slugs(results: &[Value]) -> Vec<&str> {
        results.iter().map(|r| r["slug"].as_str().unwrap()).collect()
    }

    fn cards_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "type": { "const": "card@1.0.0" },
                "data": { "type": "object", "additionalProperties": true }
            },
            "required": ["slug", "type"]
        })
    }

    // ---- Test 1: Sort by a nested path, both directions ----

    #[test]
    fn sort_by_timestamp() {
        let mut graph = TestGraph::default();
        graph.add("card-2", "card@1.0.0", json!({ "timestamp": 1549016200000u64 }));
        graph.add("card-3", "card@1.0.0", json!({ "timestamp": 1549016300000u64 }));
        graph.add("card-1", "card@1.0.0", json!({ "timestamp": 1549016100000u64 }));

        let asc = graph.run(
            cards_schema(),
            &QueryOptions::default().sorted_by(["data", "timestamp"], SortDirection::Asc),
        );
        assert_eq!(slugs(&asc), vec!["card-1", "card-2", "card-3"]);

        let desc = graph.run(
            cards_schema(),
            &QueryOptions::default().sorted_by(["data", "timestamp"], SortDirection::Desc),
        );
        assert_eq!(slugs(&desc), vec!["card-3", "card-2", "card-1"]);
    }

    // ---- Test 2: Limit zero returns nothing ----

    #[test]
    fn limit_zero_is_empty() {
        let mut graph = TestGraph::default();
        graph.add("card-1", "card@1.0.0", json!({}));
        assert!(graph.run(cards_schema(), &QueryOptions::default().with_limit(0)).is_empty());
    }

    // ---- Test 3: Sort happens before skip ----

    #[test]
    fn skip_applies_after_sort() {
        let mut graph = TestGraph::default();
        for slug in ["d", "b", "a", "c"] {
            graph.add(slug, "card@1.0.0", json!({}));
        }
        let options = QueryOptions::default()
            .sorted_by(["slug"], SortDirection::Asc)
            .with_skip(2);
        assert_eq!(slugs(&graph.run(cards_schema(), &options)), vec!["c", "d"]);

        let options = options.with_limit(1);
        assert_eq!(slugs(&graph.run(cards_schema(), &options)), vec!["c"]);
    }

    // ---- Test 4: Missing sort keys go last ascending, first descending ----

    #[test]
    fn missing_sort_keys() {
        let mut graph = TestGraph::default();
        graph.add("no-key", "card@1.0.0", json!({}));
        graph.add("one", "card@1.0.0", json!({ "rank": 1 }));
        graph.add("two", "card@1.0.0", json!({ "rank": 2 }));

        let asc = graph.run(cards_schema(), &QueryOptions::default().sorted_by(["data", "rank"], SortDirection::Asc));
        assert_eq!(slugs(&asc), vec!["one", "two", "no-key"]);
        let desc = graph.run(cards_schema(), &QueryOptions::default().sorted_by(["data", "rank"], SortDirection::Desc));
        assert_eq!(slugs(&desc), vec!["no-key", "two", "one"]);
    }

    // ---- Test 5: Links join and carry linked_at ----

    #[test]
    fn link_join_exposes_target_and_linked_at() {
        let mut graph = TestGraph::default();
        let thread = graph.add("thread-1", "thread@1.0.0", json!({ "title": "T" }));
        let card = graph.add("card-1", "card@1.0.0", json!({}));
        graph.link(card, "is attached to", thread, "has attached element", 1549016100000);

        let results = graph.run(
            json!({
                "type": "object",
                "properties": { "slug": { "const": "thread-1" } },
                "required": ["slug"],
                "$$links": {
                    "has attached element": {
                        "type": "object",
                        "properties": { "slug": { "type": "string" } }
                    }
                }
            }),
            &QueryOptions::default(),
        );
        assert_eq!(results.len(), 1);
        let related = &results[0]["links"]["has attached element"];
        assert_eq!(related[0]["slug"], "card-1");
        let linked_at = related[0]["linked_at"]["has attached element"].as_str().unwrap();
        let linked_at = chrono::DateTime::parse_from_rfc3339(linked_at).unwrap();
        assert_eq!(linked_at.timestamp_millis(), 1549016100000);
        assert!(related[0].get("data").is_none());
    }

    // ---- Test 6: Inner join excludes unlinked elements ----

    #[test]
    fn inner_join_excludes_unmatched() {
        let mut graph = TestGraph::default();
        let thread = graph.add("thread-1", "thread@1.0.0", json!({}));
        let linked = graph.add("card-linked", "card@1.0.0", json!({}));
        graph.add("card-alone", "card@1.0.0", json!({}));
        graph.link(linked, "is attached to", thread, "has attached element", 1);

        let mut schema = cards_schema();
        schema["$$links"] = json!({ "is attached to": true });
        let results = graph.run(schema, &QueryOptions::default());
        assert_eq!(slugs(&results), vec!["card-linked"]);

        let mut schema = cards_schema();
        schema["$$links"] = json!({
            "is attached to": { "properties": { "type": { "const": "user@1.0.0" } }, "required": ["type"] }
        });
        assert!(graph.run(schema, &QueryOptions::default()).is_empty());
    }

    // ---- Test 7: Inactive links are ignored ----

    #[test]
    fn inactive_links_do_not_join() {
        let mut graph = TestGraph::default();
        let thread = graph.add("thread-1", "thread@1.0.0", json!({}));
        let card = graph.add("card-1", "card@1.0.0", json!({}));
        let link_id = graph.link(card, "is attached to", thread, "has attached element", 1);
        let mut link = graph.elements[&link_id].clone();
        link.active = false;
        graph.index.upsert(&link);

        let mut schema = cards_schema();
        schema["$$links"] = json!({ "is attached to": true });
        assert!(graph.run(schema, &QueryOptions::default()).is_empty());
    }

    // ---- Test 8: Nested links through a cycle terminate ----

    #[test]
    fn nested_links_through_cycle() {
        let mut graph = TestGraph::default();
        let a = graph.add("card-a", "card@1.0.0", json!({}));
        let b = graph.add("card-b", "card@1.0.0", json!({}));
        graph.link(a, "relates to", b, "is related by", 1);
        graph.link(b, "relates to", a, "is related by", 2);

        let results = graph.run(
            json!({
                "properties": { "slug": { "const": "card-a" } },
                "required": ["slug"],
                "$$links": {
                    "relates to": {
                        "properties": { "slug": {} },
                        "$$links": { "relates to": { "properties": { "slug": {} } } }
                    }
                }
            }),
            &QueryOptions::default(),
        );
        assert_eq!(results.len(), 1);
        let b_result = &results[0]["links"]["relates to"][0];
        assert_eq!(b_result["slug"], "card-b");
        assert_eq!(b_result["links"]["relates to"][0]["slug"], "card-a");
    }

    // ---- Test 9: Per-verb pagination ----

    #[test]
    fn per_verb_pagination() {
        let mut graph = TestGraph::default();
        let thread = graph.add("thread-1", "thread@1.0.0", json!({}));
        for (i, slug) in ["card-c", "card-a", "card-b"].iter().enumerate() {
            let card = graph.add(slug, "card@1.0.0", json!({}));
            graph.link(card, "is attached to", thread, "has attached element", i as i64);
        }
        let mut options = QueryOptions::default();
        options.links.insert(
            "has attached element".to_string(),
            LinkOptions {
                sort_by: vec!["slug".to_string()],
                sort_dir: SortDirection::Asc,
                skip: 1,
                limit: Some(1),
            },
        );
        let results = graph.run(
            json!({
                "properties": { "slug": { "const": "thread-1" } },
                "required": ["slug"],
                "$$links": { "has attached element": { "properties": { "slug": {} } } }
            }),
            &options,
        );
        let related = results[0]["links"]["has attached element"].as_array().unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0]["slug"], "card-b");
    }

    // ---- Test 10: Alternatives with links merge their results ----

    #[test]
    fn alternatives_with_links() {
        let mut graph = TestGraph::default();
        let thread = graph.add("thread-1", "thread@1.0.0", json!({}));
        let linked = graph.add("card-linked", "card@1.0.0", json!({}));
        graph.add("card-named", "card@1.0.0", json!({}));
        graph.add("card-other", "card@1.0.0", json!({}));
        graph.link(linked, "is attached to", thread, "has attached element", 1);

        let results = graph.run(
            json!({
                "anyOf": [
                    { "properties": { "slug": {} }, "$$links": { "is attached to": true } },
                    { "properties": { "slug": { "const": "card-named" } }, "required": ["slug"] }
                ]
            }),
            &QueryOptions::default().sorted_by(["slug"], SortDirection::Asc),
        );
        assert_eq!(slugs(&results), vec!["card-linked", "card-named"]);
    }

    proptest::proptest! {
        #[test]
        fn paginate_sorts_then_slices(
            ranks in proptest::collection::vec(0i64..1000, 0..40),
            skip in 0usize..50,
            limit in proptest::option::of(0usize..50),
        ) {
            let items: Vec<(Value, Value)> = ranks
                .iter()
                .map(|r| (json!({ "rank": r }), json!(r)))
                .collect();
            let page = paginate(items, &["rank".to_string()], SortDirection::Asc, skip, limit);

            let mut expected = ranks.clone();
            expected.sort();
            let expected: Vec<Value> = expected
                .into_iter()
                .skip(skip)
                .take(limit.unwrap_or(usize::MAX))
                .map(|r| json!(r))
                .collect();
            proptest::prop_assert_eq!(page, expected);
        }
    }
}
