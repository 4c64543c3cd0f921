use super::*;
use chumsky::{
    error::SimpleReason,
    prelude::*,
    text::{self, whitespace},
};
use itertools::Itertools;
use serde::de::DeserializeOwned;

#[derive(Debug, Snafu)]
#[snafu(display("cannot parse '{input}' - {}", self.combine_errors("\n")))]
pub struct ParseError {
    input: String,
    errors: Vec<Simple<char>>,
}

impl ParseError {
    fn combine_errors(&self, separator: &str) -> String {
        self.errors
            .iter()
            .map(|err| {
                format!(
                    "{}:\n   {}",
                    err,
                    match err.reason() {
                        SimpleReason::Custom(msg) => format!("error {}", msg),
                        SimpleReason::Unexpected => "unexpected input".to_string(),
                        SimpleReason::Unclosed { span, delimiter } => {
                            format!(
                                "unclosed delimiter ({}..{}) in {}",
                                span.start, span.end, delimiter
                            )
                        }
                    }
                )
            })
            .join(separator)
    }
}

pub fn parse(input: &str) -> Result<Action, ParseError> {
    if input.trim().is_empty() {
        return Ok(Action::None);
    }

    program().parse(input).map_err(|errors| ParseError {
        input: input.to_string(),
        errors,
    })
}

fn program() -> impl Parser<char, Action, Error = Simple<char>> {
    choice((
        task_action(),
        lecture_action(),
        just("list").to(Action::List),
        just("pending").to(Action::Pending),
        just("health").to(Action::Health),
        just("reconcile").to(Action::Reconcile),
        choice((just("exit"), just("quit"))).to(Action::Exit),
    ))
    .padded()
    .then_ignore(end())
}

fn task_action() -> impl Parser<char, Action, Error = Simple<char>> {
    let add = keyword("add")
        .ignore_then(content::<Task>("task"))
        .map(|task| Action::AddTask { task });
    let update = keyword("update")
        .ignore_then(entity_id())
        .then_ignore(whitespace().at_least(1))
        .then(content::<Patch>("patch"))
        .map(|(id, patch)| Action::UpdateTask { id, patch });
    let done = keyword("done")
        .ignore_then(entity_id())
        .map(|id| Action::CompleteTask { id });
    let remove = keyword("remove")
        .ignore_then(entity_id())
        .map(|id| Action::RemoveTask { id });

    keyword("task").ignore_then(choice((add, update, done, remove)))
}

fn lecture_action() -> impl Parser<char, Action, Error = Simple<char>> {
    let add = keyword("add")
        .ignore_then(content::<Lecture>("lecture"))
        .map(|lecture| Action::AddLecture { lecture });
    let update = keyword("update")
        .ignore_then(entity_id())
        .then_ignore(whitespace().at_least(1))
        .then(content::<Patch>("patch"))
        .map(|(id, patch)| Action::UpdateLecture { id, patch });
    let remove = keyword("remove")
        .ignore_then(entity_id())
        .map(|id| Action::RemoveLecture { id });

    keyword("lecture").ignore_then(choice((add, update, remove)))
}

fn keyword(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    just(word).ignored().then_ignore(whitespace().at_least(1))
}

fn entity_id() -> impl Parser<char, i64, Error = Simple<char>> {
    text::int(10).try_map(|digits: String, span| {
        digits
            .parse()
            .map_err(|_| Simple::custom(span, "invalid id"))
    })
}

fn content<T: DeserializeOwned>(what: &'static str) -> impl Parser<char, T, Error = Simple<char>> {
    take_until(end()).try_map(move |(chars, _), span| {
        let str = chars.into_iter().collect::<String>();
        serde_json::from_str(&str)
            .map_err(|source| Simple::custom(span, format!("invalid {} content: {}", what, source)))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::model::DayOfWeek;

    use super::*;

    #[test]
    fn test_grammar() {
        assert_eq!(program().parse("task remove 4").unwrap(), Action::RemoveTask { id: 4 });
        assert_eq!(program().parse("lecture remove 12").unwrap(), Action::RemoveLecture { id: 12 });
        assert_eq!(program().parse("task done 3").unwrap(), Action::CompleteTask { id: 3 });
        assert_eq!(program().parse("  list ").unwrap(), Action::List);
        assert_eq!(program().parse("pending").unwrap(), Action::Pending);
        assert_eq!(program().parse("health").unwrap(), Action::Health);
        assert_eq!(program().parse("reconcile").unwrap(), Action::Reconcile);
        assert_eq!(program().parse("quit").unwrap(), Action::Exit);
        assert_eq!(program().parse("exit").unwrap(), Action::Exit);
    }

    #[test]
    fn empty_line_does_nothing() {
        assert_eq!(parse("   ").unwrap(), Action::None);
    }

    #[test]
    fn parse_task_content() {
        let input = format!(
            "task add {}",
            json!({
                "title": "Essay",
                "due_date": "2024-03-01T23:59:00+01:00",
                "reminder_enabled": true,
                "reminder_minutes": 60
            })
        );

        let Action::AddTask { task } = parse(&input).unwrap() else {
            panic!("expected a new task");
        };
        assert_eq!(task.title, "Essay");
        assert_eq!(task.reminder_minutes, Some(60));
        assert_eq!(task.category, "General");
    }

    #[test]
    fn parse_lecture_content() {
        let input = format!(
            "lecture add {}",
            json!({ "title": "Compilers", "day_of_week": "WEDNESDAY", "start_time": "09:00" })
        );

        let Action::AddLecture { lecture } = parse(&input).unwrap() else {
            panic!("expected a new lecture");
        };
        assert_eq!(lecture.day_of_week, DayOfWeek::Wednesday);
        assert!(lecture.is_recurring);
    }

    #[test]
    fn parse_patch() {
        let action = parse(r#"lecture update 3 {"room": "B2"}"#).unwrap();

        let Action::UpdateLecture { id, patch } = action else {
            panic!("expected a lecture update");
        };
        assert_eq!(id, 3);
        assert_eq!(patch.get("room"), Some(&json!("B2")));
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse("task add {").is_err());
        assert!(parse("lecture update x {}").is_err());
        assert!(parse("dance").is_err());

        let error = parse(r#"lecture add {"title": "Compilers", "day_of_week": "FUNDAY", "start_time": "09:00"}"#)
            .unwrap_err();
        assert!(error.to_string().contains("invalid lecture content"));
    }
}
