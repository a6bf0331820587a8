//! Typed `OData` `$filter` expressions.
//!
//! Filters are assembled as a tree and rendered once, so a prefix or id
//! supplied on the command line always ends up inside a quoted literal.

/// One node of an `$filter` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ODataFilter {
    /// Caller-supplied expression, rendered verbatim inside parentheses.
    Expression(String),
    /// `startsWith(property, 'value')`
    StartsWith { property: String, value: String },
    /// `property eq 'value'`
    Equals { property: String, value: String },
    /// `not (inner)`
    Not(Box<ODataFilter>),
    /// Conjunction of the children.
    And(Vec<ODataFilter>),
    /// Disjunction of the children.
    Or(Vec<ODataFilter>),
}

impl ODataFilter {
    pub fn starts_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StartsWith {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn not(inner: ODataFilter) -> Self {
        Self::Not(Box::new(inner))
    }

    /// True when rendering produces nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Expression(expr) => expr.trim().is_empty(),
            Self::And(children) | Self::Or(children) => children.iter().all(Self::is_empty),
            Self::Not(inner) => inner.is_empty(),
            Self::StartsWith { .. } | Self::Equals { .. } => false,
        }
    }

    /// True when any rendered node is a negation.
    ///
    /// Graph only evaluates `not` on directory objects as an advanced query.
    #[must_use]
    pub fn uses_negation(&self) -> bool {
        match self {
            Self::Not(inner) => !inner.is_empty(),
            Self::And(children) | Self::Or(children) => children.iter().any(Self::uses_negation),
            Self::Expression(expr) => contains_not_operator(expr),
            Self::StartsWith { .. } | Self::Equals { .. } => false,
        }
    }

    /// A lone comparison, possibly inside single-child groups.
    fn is_atom(&self) -> bool {
        match self {
            Self::StartsWith { .. } | Self::Equals { .. } => true,
            Self::And(children) | Self::Or(children) => {
                let mut live = children.iter().filter(|c| !c.is_empty());
                matches!((live.next(), live.next()), (Some(only), None) if only.is_atom())
            }
            Self::Expression(_) | Self::Not(_) => false,
        }
    }

    /// Renders the expression, or `None` when nothing is left.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Expression(expr) => {
                let expr = expr.trim();
                (!expr.is_empty()).then(|| format!("({expr})"))
            }
            Self::StartsWith { property, value } => {
                Some(format!("startsWith({property}, {})", quote(value)))
            }
            Self::Equals { property, value } => Some(format!("{property} eq {}", quote(value))),
            Self::Not(inner) => inner.render().map(|r| {
                if inner.is_atom() {
                    format!("not {r}")
                } else {
                    format!("not ({})", unwrap_single(&r))
                }
            }),
            Self::And(children) => render_group(children, " and "),
            Self::Or(children) => render_group(children, " or "),
        }
    }
}

/// Builds a conjunction from optional parts.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    clauses: Vec<ODataFilter>,
}

impl FilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause; empty clauses are dropped.
    #[must_use]
    pub fn and(mut self, clause: ODataFilter) -> Self {
        if !clause.is_empty() {
            self.clauses.push(clause);
        }
        self
    }

    /// Adds `clause` when present.
    #[must_use]
    pub fn and_maybe(self, clause: Option<ODataFilter>) -> Self {
        match clause {
            Some(c) => self.and(c),
            None => self,
        }
    }

    /// `None` when no clause was added.
    #[must_use]
    pub fn build(self) -> Option<ODataFilter> {
        (!self.clauses.is_empty()).then(|| ODataFilter::And(self.clauses))
    }
}

fn render_group(children: &[ODataFilter], separator: &str) -> Option<String> {
    let rendered: Vec<String> = children
        .iter()
        .filter_map(|child| child.render().map(|r| wrap(child, r)))
        .collect();

    match rendered.len() {
        0 => None,
        1 => rendered.into_iter().next().map(|r| unwrap_single(&r)),
        _ => Some(rendered.join(separator)),
    }
}

/// Parenthesises compound children so precedence survives joining.
fn wrap(node: &ODataFilter, rendered: String) -> String {
    let compound = match node {
        ODataFilter::And(children) | ODataFilter::Or(children) => {
            children.iter().filter(|c| !c.is_empty()).count() > 1
        }
        _ => false,
    };
    if compound {
        format!("({rendered})")
    } else {
        rendered
    }
}

fn unwrap_single(rendered: &str) -> String {
    rendered
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .filter(|inner| balanced(inner))
        .unwrap_or(rendered)
        .to_string()
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Quotes a string literal, doubling embedded single quotes.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Looks for a `not` token outside string literals.
fn contains_not_operator(expr: &str) -> bool {
    let mut in_literal = false;
    let mut token = String::new();

    for c in expr.chars().chain(std::iter::once(' ')) {
        if c == '\'' {
            in_literal = !in_literal;
            token.clear();
            continue;
        }
        if in_literal {
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            token.push(c);
        } else {
            if token.eq_ignore_ascii_case("not") || token.eq_ignore_ascii_case("ne") {
                return true;
            }
            token.clear();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_single_quotes() {
        let f = ODataFilter::starts_with("mailNickname", "o'brien");
        assert_eq!(
            f.render().unwrap(),
            "startsWith(mailNickname, 'o''brien')"
        );
    }

    #[test]
    fn test_or_group_of_prefixes() {
        let f = ODataFilter::Or(vec![
            ODataFilter::starts_with("mailNickname", "PRJ-"),
            ODataFilter::starts_with("mailNickname", "OPS-"),
        ]);
        assert_eq!(
            f.render().unwrap(),
            "startsWith(mailNickname, 'PRJ-') or startsWith(mailNickname, 'OPS-')"
        );
        assert!(!f.uses_negation());
    }

    #[test]
    fn test_conjunction_parenthesises_compound_children() {
        let filter = FilterBuilder::new()
            .and(ODataFilter::Expression(
                "groupTypes/any(c:c eq 'Unified')".into(),
            ))
            .and(ODataFilter::Or(vec![
                ODataFilter::starts_with("mailNickname", "A"),
                ODataFilter::starts_with("mailNickname", "B"),
            ]))
            .and(ODataFilter::And(vec![ODataFilter::not(
                ODataFilter::starts_with("mailNickname", "AX"),
            )]))
            .build()
            .unwrap();

        assert_eq!(
            filter.render().unwrap(),
            "(groupTypes/any(c:c eq 'Unified')) and \
             (startsWith(mailNickname, 'A') or startsWith(mailNickname, 'B')) and \
             not startsWith(mailNickname, 'AX')"
        );
        assert!(filter.uses_negation());
    }

    #[test]
    fn test_negation_keeps_inner_precedence() {
        let grouped = ODataFilter::not(ODataFilter::And(vec![ODataFilter::Expression(
            "a or b".into(),
        )]));
        assert_eq!(grouped.render().unwrap(), "not (a or b)");

        let compound = ODataFilter::not(ODataFilter::Or(vec![
            ODataFilter::equals("visibility", "Public"),
            ODataFilter::starts_with("mailNickname", "X"),
        ]));
        assert_eq!(
            compound.render().unwrap(),
            "not (visibility eq 'Public' or startsWith(mailNickname, 'X'))"
        );

        let nested = ODataFilter::not(ODataFilter::not(ODataFilter::equals("id", "a")));
        assert_eq!(nested.render().unwrap(), "not (not id eq 'a')");

        let single = ODataFilter::not(ODataFilter::Or(vec![ODataFilter::equals("id", "a")]));
        assert_eq!(single.render().unwrap(), "not id eq 'a'");
    }

    #[test]
    fn test_empty_groups_are_dropped() {
        let filter = FilterBuilder::new()
            .and(ODataFilter::Or(vec![]))
            .and(ODataFilter::Expression("   ".into()))
            .build();
        assert!(filter.is_none());

        let single = FilterBuilder::new()
            .and(ODataFilter::Or(vec![]))
            .and(ODataFilter::equals("id", "abc"))
            .build()
            .unwrap();
        assert_eq!(single.render().unwrap(), "id eq 'abc'");
    }

    #[test]
    fn test_negation_detected_in_expression() {
        assert!(contains_not_operator("not(startsWith(displayName,'x'))"));
        assert!(contains_not_operator("visibility ne 'Public'"));
        assert!(!contains_not_operator("displayName eq 'not me'"));
        assert!(!contains_not_operator("notes eq 'x'"));
    }
}
