//! End-to-end rendering tests covering whole-template behavior:
//! expression semantics observable through output, sync/async parity,
//! cancellation, resource limits and the undefined modes. Narrower cases
//! live with their modules.

use crate::{
    CancellationToken, DictLoader, Environment, Object, UndefinedMode,
    Value,
    test_util::{assert_err, globals_object, render, render_with},
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_output_with_filter_chain() {
    assert_eq!(
        render(
            "Hello, {{ name | upcase | append: \"!\" }}",
            json!({"name": "bob"})
        )
        .unwrap(),
        "Hello, BOB!"
    );
}

#[test]
fn test_conditional_rendering() {
    let template =
        "{% if user.age >= 21 %}adult{% else %}minor{% endif %}";
    assert_eq!(
        render(template, json!({"user": {"age": 20}})).unwrap(),
        "minor"
    );
    assert_eq!(
        render(template, json!({"user": {"age": 30}})).unwrap(),
        "adult"
    );
}

#[test]
fn test_loop_limit_then_offset_continue() {
    let template = "{% for x in a limit: 2 %}{{x}}{% endfor %}\
                    {% for x in a offset: continue %}{{x}}{% endfor %}";
    assert_eq!(
        render(template, json!({"a": [1, 2, 3, 4, 5]})).unwrap(),
        "12345"
    );
}

#[test]
fn test_range_literal_assignment() {
    assert_eq!(
        render(
            "{% assign r = (1..3) %}{% for i in r %}{{i}},{% endfor %}",
            json!({})
        )
        .unwrap(),
        "1,2,3,"
    );
}

#[test]
fn test_empty_blank_semantics() {
    assert_eq!(
        render(
            "{{ '' == blank }} {{ '' == empty }} {{ '   ' == blank }} \
             {{ '   ' == empty }}",
            json!({})
        )
        .unwrap(),
        "true true true false"
    );
}

#[test]
fn test_ternary_with_tail_filter() {
    assert_eq!(
        render("{{ 'foo' if missing else 'bar' || upcase }}", json!({}))
            .unwrap(),
        "BAR"
    );
    assert_eq!(
        render(
            "{{ 'foo' if present else 'bar' || upcase }}",
            json!({"present": true})
        )
        .unwrap(),
        "FOO"
    );
}

#[rstest]
#[case::nil_renders_empty("[{{ nothing }}]", "[]")]
#[case::nil_equals_undefined("{{ nil == missing }}", "true")]
#[case::false_is_falsy("{% if f %}t{% else %}f{% endif %}", "f")]
#[case::zero_is_truthy("{% if zero %}t{% else %}f{% endif %}", "t")]
#[case::empty_array_is_truthy(
    "{% if empty_list %}t{% else %}f{% endif %}",
    "t"
)]
#[case::boolean_isolation("{{ one == true }} {{ zero == false }}", "false false")]
#[case::numeric_cross_type("{{ one == 1.0 }}", "true")]
#[case::string_compare("{{ 'abc' < 'abd' }}", "true")]
#[case::contains_substring("{{ 'hello' contains 'ell' }}", "true")]
#[case::contains_member("{{ list contains 2 }}", "true")]
#[case::float_output("{{ 1.0 }} {{ 2.5 }}", "1.0 2.5")]
#[case::negative_index("{{ list[-1] }}", "3")]
#[case::quoted_key("{{ person[\"full name\"] }}", "Sal P")]
#[case::nested_path_segment("{{ person[which] }}", "Sal P")]
#[case::size_property("{{ list.size }} {{ word.size }}", "3 5")]
#[case::first_last("{{ list.first }}{{ list.last }}", "13")]
fn test_value_semantics(#[case] template: &str, #[case] expected: &str) {
    let globals = json!({
        "f": false,
        "zero": 0,
        "one": 1,
        "empty_list": [],
        "list": [1, 2, 3],
        "word": "hello",
        "person": {"full name": "Sal P"},
        "which": "full name",
    });
    assert_eq!(render(template, globals).unwrap(), expected);
}

/// Rendering must not mutate the globals passed in; a second render of the
/// same parsed template over the same data is byte-identical
#[test]
fn test_render_is_pure() {
    let env = Environment::default();
    let template = env
        .parse(
            "{% assign y = x | plus: 1 %}{{ y }}\
             {% for i in (1..2) %}{% increment n %}{% endfor %}",
        )
        .unwrap();
    let globals = globals_object(json!({"x": 1}));

    let first = template.render(&env, globals.clone()).unwrap();
    let second = template.render(&env, globals.clone()).unwrap();
    assert_eq!(first, second);
    assert_eq!(globals, globals_object(json!({"x": 1})));
}

/// One parsed template, shared across threads, renders independently
#[test]
fn test_shared_template_concurrent_renders() {
    let env = Arc::new(
        Environment::builder().global("greeting", "hi").build(),
    );
    let template = Arc::new(
        env.parse("{{ greeting }} {{ n }}{% increment c %}").unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let env = Arc::clone(&env);
            let template = Arc::clone(&template);
            std::thread::spawn(move || {
                let globals =
                    globals_object(json!({ "n": n.to_string() }));
                template.render(&env, globals).unwrap()
            })
        })
        .collect();
    let mut outputs: Vec<String> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    outputs.sort();
    // Each render owns its own counters, so every render sees 0
    assert_eq!(outputs, vec!["hi 00", "hi 10", "hi 20", "hi 30"]);
}

#[tokio::test]
async fn test_async_render_matches_sync() {
    let env = Environment::builder()
        .loader(Arc::new(DictLoader::from_iter([(
            "partial",
            "p:{{ x }}",
        )])))
        .build();
    let template = env
        .parse("{% include 'partial' %}/{{ x | times: 2 }}")
        .unwrap();
    let globals = globals_object(json!({"x": 4}));

    let sync_output = template.render(&env, globals.clone()).unwrap();
    let async_output =
        template.render_async(&env, globals).await.unwrap();
    assert_eq!(sync_output, "p:4/8");
    assert_eq!(sync_output, async_output);
}

#[tokio::test]
async fn test_cancellation() {
    let env = Environment::default();
    let template =
        env.parse("{% for i in (1..100) %}{{ i }}{% endfor %}").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = template
        .render_cancellable(&env, Object::new(), &cancel)
        .await;
    assert_err!(result, "render cancelled");
}

#[test]
fn test_undefined_modes() {
    // Plain: renders nothing
    assert_eq!(render("[{{ missing }}]", json!({})).unwrap(), "[]");

    // Debug: renders a diagnostic
    let debug = Environment::builder()
        .undefined(UndefinedMode::Debug)
        .build();
    assert_eq!(
        render_with(&debug, "[{{ missing.deeper }}]", json!({})).unwrap(),
        "['missing.deeper' is undefined]"
    );

    // Strict: first use is an error
    let strict = Environment::builder()
        .undefined(UndefinedMode::Strict)
        .build();
    assert_err!(
        render_with(&strict, "{{ missing }}", json!({})),
        "'missing' is undefined"
    );
    assert_err!(
        render_with(&strict, "{% if missing %}x{% endif %}", json!({})),
        "'missing' is undefined"
    );
    assert_err!(
        render_with(&strict, "{{ missing | upcase }}", json!({})),
        "'missing' is undefined"
    );
    // Defined values are unaffected
    assert_eq!(
        render_with(&strict, "{{ x }}", json!({"x": 1})).unwrap(),
        "1"
    );
}

#[test]
fn test_output_limit_truncates_nothing_beyond_limit() {
    let env = Environment::builder().output_stream_limit(10).build();
    let template =
        env.parse("{% for i in (1..100) %}{{ i }}{% endfor %}").unwrap();
    assert_err!(
        template.render(&env, Object::new()),
        "output stream limit reached (10 bytes)"
    );
}

#[test]
fn test_whitespace_control_end_to_end() {
    assert_eq!(
        render(
            "<ul>\n{% for i in (1..2) -%}\n  <li>{{ i }}</li>\n\
             {%- endfor %}\n</ul>",
            json!({})
        )
        .unwrap(),
        "<ul>\n<li>1</li><li>2</li>\n</ul>"
    );
}

#[test]
fn test_raw_and_doc_and_comments() {
    assert_eq!(
        render(
            "{% raw %}{{ literal }}{% endraw %}\
             {% doc %}docs{% enddoc %}\
             {% comment %}{{ nope }}{% endcomment %}!",
            json!({})
        )
        .unwrap(),
        "{{ literal }}!"
    );
}

/// The same source renders identically through a fresh parse and through
/// the template cache
#[test]
fn test_cache_transparency() {
    let env = Environment::builder()
        .loader(Arc::new(DictLoader::from_iter([(
            "page",
            "{{ n | plus: 1 }}",
        )])))
        .build();
    let from_cache_miss = env.get_template("page").unwrap();
    let from_cache_hit = env.get_template("page").unwrap();
    let globals = globals_object(json!({"n": 41}));
    assert_eq!(
        from_cache_miss.render(&env, globals.clone()).unwrap(),
        "42"
    );
    assert_eq!(from_cache_hit.render(&env, globals).unwrap(), "42");
}

/// Loaded templates put their name on render-time errors
#[test]
fn test_error_names_the_template() {
    let env = Environment::builder()
        .loader(Arc::new(DictLoader::from_iter([(
            "broken",
            "{{ 1 | divided_by: 0 }}",
        )])))
        .build();
    let template = env.get_template("broken").unwrap();
    let error = template.render(&env, Object::new()).unwrap_err();
    assert_eq!(
        error.location().and_then(|l| l.template_name()),
        Some("broken")
    );
}

#[test]
fn test_drop_integration() {
    #[derive(Debug)]
    struct Cart {
        items: Vec<&'static str>,
    }

    impl crate::ObjectDrop for Cart {
        fn get(&self, name: &str) -> Option<Value> {
            match name {
                "item_count" => Some(Value::Int(self.items.len() as i64)),
                _ => None,
            }
        }

        fn size(&self) -> Option<i64> {
            Some(self.items.len() as i64)
        }

        fn iterate(&self) -> Option<Vec<Value>> {
            Some(self.items.iter().map(|&item| item.into()).collect())
        }
    }

    let cart: Arc<dyn crate::ObjectDrop> =
        Arc::new(Cart { items: vec!["mug", "hat"] });
    let env = Environment::builder().global("cart", cart).build();
    let template = env
        .parse(
            "{{ cart.item_count }}:{{ cart.size }}:\
             {% for item in cart %}{{ item }} {% endfor %}",
        )
        .unwrap();
    assert_eq!(
        template.render(&env, Object::new()).unwrap(),
        "2:2:mug hat "
    );
}
