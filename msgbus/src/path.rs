//! Path-based tree access
//!
//! Paths follow `segment ("." segment)*` where a segment is either a property
//! name or a 0-based array index written `[N]`.

use crate::msg::{Msg, MsgError, MsgType};

enum Token<'a> {
    Name(&'a str),
    Index(usize),
}

fn parse_token(tok: &str) -> Option<Token<'_>> {
    if tok.is_empty() {
        return None;
    }
    if tok.len() >= 3 && tok.starts_with('[') && tok.ends_with(']') {
        let inner = &tok[1..tok.len() - 1];
        if let Ok(i) = inner.parse::<usize>() {
            return Some(Token::Index(i));
        }
        // bracketed but not a decimal index is malformed
        return None;
    }
    Some(Token::Name(tok))
}

impl Msg {
    /// Walk a nested path, returning the node at the last segment.
    ///
    /// Example: `msg.lookup("a.b.[3].c")`.
    pub fn lookup(&self, path: &str) -> Option<&Msg> {
        let mut m = self;
        for tok in path.split('.') {
            m = match parse_token(tok)? {
                Token::Index(i) => match m {
                    Msg::Array(items) => items.get(i)?,
                    _ => return None,
                },
                Token::Name(name) => m.prop(name)?,
            };
        }
        Some(m)
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut Msg> {
        let mut m = self;
        for tok in path.split('.') {
            m = match parse_token(tok)? {
                Token::Index(i) => match m {
                    Msg::Array(items) => items.get_mut(i)?,
                    _ => return None,
                },
                Token::Name(name) => m.prop_mut(name)?,
            };
        }
        Some(m)
    }

    /// Walk a nested path, creating missing nodes along the way.
    ///
    /// Null nodes are materialized into objects or arrays as the path
    /// demands; arrays grow with null fill when an index is out of range.
    /// Fails when an existing node conflicts with the path shape.
    pub fn mkpath(&mut self, path: &str) -> Result<&mut Msg, MsgError> {
        let mut m = self;
        for tok in path.split('.') {
            let tok = parse_token(tok).ok_or_else(|| MsgError::Path(tok.to_string()))?;
            m = match tok {
                Token::Index(i) => {
                    if matches!(m, Msg::Null) {
                        *m = Msg::new_array();
                    }
                    match m {
                        Msg::Array(_) => {
                            if i >= m.item_count() {
                                m.resize(i + 1)?;
                            }
                            m.item_mut(i).unwrap()
                        }
                        other => {
                            return Err(MsgError::Type {
                                expected: MsgType::Array,
                                found: other.msg_type(),
                            })
                        }
                    }
                }
                Token::Name(name) => {
                    if matches!(m, Msg::Null) {
                        *m = Msg::new_object();
                    }
                    match m {
                        Msg::Object(_) => {
                            if m.prop(name).is_none() {
                                m.set_prop(name, Msg::Null)?;
                            }
                            m.prop_mut(name).unwrap()
                        }
                        other => {
                            return Err(MsgError::Type {
                                expected: MsgType::Object,
                                found: other.msg_type(),
                            })
                        }
                    }
                }
            };
        }
        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_nested() {
        let mut m = Msg::new_object();
        let arr = m.set_prop("a", Msg::new_object()).unwrap();
        let arr = arr.set_prop("b", Msg::new_array()).unwrap();
        arr.resize(4).unwrap();
        arr.item_mut(3)
            .unwrap()
            .assign(Msg::new_object());
        arr.item_mut(3)
            .unwrap()
            .set_prop("c", 7)
            .unwrap();

        assert_eq!(m.lookup("a.b.[3].c").unwrap().as_int(), Some(7));
        assert!(m.lookup("a.b.[4].c").is_none());
        assert!(m.lookup("a.x").is_none());
        assert!(m.lookup("a..b").is_none());
    }

    #[test]
    fn test_lookup_index_on_non_array() {
        let mut m = Msg::new_object();
        m.set_prop("a", 1).unwrap();
        assert!(m.lookup("a.[0]").is_none());
    }

    #[test]
    fn test_mkpath_creates_structure() {
        let mut m = Msg::new_object();
        m.mkpath("a.b.[2].c").unwrap().assign(Msg::from("deep"));

        assert_eq!(m.lookup("a.b.[2].c").unwrap().as_str(), Some("deep"));
        // slots grown along the way are nulls
        assert_eq!(m.lookup("a.b.[0]").unwrap().msg_type(), MsgType::Null);
        assert_eq!(m.lookup("a.b").unwrap().item_count(), 3);
    }

    #[test]
    fn test_mkpath_type_conflict() {
        let mut m = Msg::new_object();
        m.set_prop("a", 1).unwrap();
        assert!(m.mkpath("a.b").is_err());
        assert!(m.mkpath("a.[0]").is_err());
        // the conflicting node is untouched
        assert_eq!(m.prop("a").unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_mkpath_existing_nodes_reused() {
        let mut m = Msg::new_object();
        m.mkpath("a.b").unwrap().assign(Msg::from(1));
        m.mkpath("a.c").unwrap().assign(Msg::from(2));
        assert_eq!(m.prop("a").unwrap().item_count(), 2);
    }
}
