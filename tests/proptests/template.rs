// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Property tests: template expansion
//!
//! `expand` sits on every rendering path, so it has to accept any text
//! a producer hands it. The properties below pin down the escape rules
//! and the positional substitution without enumerating cases by hand.

use eventline::template::expand;
use eventline::{RenderBuffer, Value};
use proptest::prelude::*;

fn render(template: &str, args: &[Value<'_>]) -> String {
    let mut buf = RenderBuffer::new();
    let written = expand(template, |i| args.get(i).copied(), &mut buf);
    assert_eq!(written, buf.len());
    String::from_utf8(buf.into_vec()).unwrap()
}

fn escape(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

proptest! {
    /// Arbitrary text and arguments never panic and always yield valid UTF-8
    #[test]
    fn test_expand_does_not_panic(template in ".*", args in prop::collection::vec(".*", 0..4)) {
        let values: Vec<Value<'_>> = args.iter().map(|a| Value::from(a.as_str())).collect();
        let _ = render(&template, &values);
    }

    /// Text without braces is copied as-is
    #[test]
    fn test_plain_text_is_verbatim(template in "[^{}]*") {
        prop_assert_eq!(render(&template, &[Value::from("unused")]), template);
    }

    /// Escaping every brace makes any text render back to itself
    #[test]
    fn test_escaped_text_round_trips(text in ".*") {
        prop_assert_eq!(render(&escape(&text), &[]), text);
    }

    /// `{n}` is replaced by the n-th argument, whatever surrounds it
    #[test]
    fn test_positional_substitution(
        before in "[^{}]*",
        after in "[^{}]*",
        args in prop::collection::vec("[a-z0-9 ]*", 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let n = pick.index(args.len());
        let values: Vec<Value<'_>> = args.iter().map(|a| Value::from(a.as_str())).collect();
        let template = format!("{}{{{}}}{}", before, n, after);
        prop_assert_eq!(render(&template, &values), format!("{}{}{}", before, args[n], after));
    }

    /// Placeholders past the last argument stay in the output untouched
    #[test]
    fn test_missing_argument_is_verbatim(extra in 0usize..100, prefix in "[^{}]*") {
        let template = format!("{}{{{}}}", prefix, 2 + extra);
        prop_assert_eq!(render(&template, &[Value::from(1u8), Value::from(2u8)]), template);
    }

    /// Numbers render exactly as their Display impl
    #[test]
    fn test_numeric_arguments(i in any::<i64>(), u in any::<u64>(), b in any::<bool>()) {
        prop_assert_eq!(
            render("{0}|{1}|{2}", &[i.into(), u.into(), b.into()]),
            format!("{}|{}|{}", i, u, b)
        );
    }
}
