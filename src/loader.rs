use std::io::Read;

use derive_new::new;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::multispace0,
    combinator::map,
    multi::separated_list0,
    sequence::delimited,
    IResult, Parser,
};

use crate::error::{RdError, Result};
use crate::model::{Model, Reaction, Species};

/// A parsed node of the model-file format: a restricted YAML subset
/// with block mappings by indentation, nestable flow sequences, plain
/// scalars, comments, and `---` document separators.
///
/// Mappings keep their entries in file order and may repeat keys;
/// `species` and `reaction` clauses rely on that.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(String),
    Seq(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    fn entries(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// First entry under `key`, for maps where the key is unique.
    fn get(&self, key: &str) -> Option<&Value> {
        self.entries()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// One significant line of input: its indentation depth, its key, and
/// the inline value (if any; a keyless tail starts a nested block).
#[derive(Clone, Debug, new)]
struct Line {
    number: usize,
    indent: usize,
    key: String,
    inline: Option<Value>,
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-').parse(input)
}

fn parse_flow_scalar(input: &str) -> IResult<&str, Value> {
    let (rem, s) = take_while1(|c: char| !"[],#\n".contains(c)).parse(input)?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TakeWhile1,
        )));
    }
    Ok((rem, Value::Scalar(trimmed.to_owned())))
}

fn parse_flow_seq(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            (tag("["), multispace0),
            separated_list0(
                delimited(multispace0, tag(","), multispace0),
                parse_flow_value,
            ),
            (multispace0, tag("]")),
        ),
        Value::Seq,
    )
    .parse(input)
}

fn parse_flow_value(input: &str) -> IResult<&str, Value> {
    alt((parse_flow_seq, parse_flow_scalar)).parse(input)
}

/// Parses the body of a significant line: `key:` optionally followed
/// by an inline value and a trailing comment.
fn parse_line_body(input: &str) -> IResult<&str, (String, Option<Value>)> {
    let (rem, (key, _, _)) = (parse_key, multispace0, tag(":")).parse(input)?;

    let rest = rem.trim_start();
    if rest.is_empty() || rest.starts_with('#') {
        return Ok(("", (key.to_owned(), None)));
    }

    let (tail, value) = parse_flow_value(rest)?;
    let tail = tail.trim_start();
    if !tail.is_empty() && !tail.starts_with('#') {
        return Err(nom::Err::Error(nom::error::Error::new(
            tail,
            nom::error::ErrorKind::Eof,
        )));
    }
    Ok(("", (key.to_owned(), Some(value))))
}

/// Splits the input into documents of significant lines.
fn scan_documents(input: &str) -> Result<Vec<Vec<Line>>> {
    let mut documents = vec![Vec::new()];

    for (number, raw) in input.lines().enumerate() {
        let number = number + 1;
        let stripped = raw.trim_end();
        let body = stripped.trim_start_matches(' ');

        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        if body == "---" {
            documents.push(Vec::new());
            continue;
        }
        if body == "..." {
            continue;
        }
        if body.starts_with('\t') {
            return Err(RdError::ModelIo(format!(
                "line {number}: tabs are not allowed in indentation"
            )));
        }

        let indent = stripped.len() - body.len();
        let (key, inline) = parse_line_body(body)
            .map(|(_, parsed)| parsed)
            .map_err(|_| RdError::ModelIo(format!("line {number}: cannot parse {body:?}")))?;

        documents
            .last_mut()
            .expect("document list is never empty")
            .push(Line::new(number, indent, key, inline));
    }

    documents.retain(|doc| !doc.is_empty());
    Ok(documents)
}

/// Assembles the lines of one document into a nested mapping by
/// indentation depth.
fn build_map(lines: &[Line], pos: &mut usize, indent: usize) -> Result<Value> {
    let mut entries = Vec::new();

    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(RdError::ModelIo(format!(
                "line {}: inconsistent indentation",
                line.number
            )));
        }
        *pos += 1;

        let value = match &line.inline {
            Some(v) => v.clone(),
            None => {
                if *pos < lines.len() && lines[*pos].indent > indent {
                    let child_indent = lines[*pos].indent;
                    build_map(lines, pos, child_indent)?
                } else {
                    Value::Map(Vec::new())
                }
            }
        };
        entries.push((line.key.clone(), value));
    }

    Ok(Value::Map(entries))
}

/// Parses the full stream into one mapping per document.
pub fn parse_documents(input: &str) -> Result<Vec<Value>> {
    scan_documents(input)?
        .iter()
        .map(|lines| {
            let mut pos = 0;
            let root_indent = lines[0].indent;
            let doc = build_map(lines, &mut pos, root_indent)?;
            if pos < lines.len() {
                return Err(RdError::ModelIo(format!(
                    "line {}: dedented below the document root",
                    lines[pos].number
                )));
            }
            Ok(doc)
        })
        .collect()
}

fn scalar_f64(value: &Value, what: &str) -> Result<f64> {
    value
        .as_scalar()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| RdError::ModelIo(format!("{what} must be a number")))
}

fn scalar_usize(value: &Value, what: &str) -> Result<usize> {
    value
        .as_scalar()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| RdError::ModelIo(format!("{what} must be a non-negative integer")))
}

fn parse_point(value: &Value, what: &str) -> Result<[f64; 3]> {
    let seq = value
        .as_seq()
        .filter(|s| s.len() == 3)
        .ok_or_else(|| RdError::ModelIo(format!("{what} must be a [x,y,z] triple")))?;
    Ok([
        scalar_f64(&seq[0], what)?,
        scalar_f64(&seq[1], what)?,
        scalar_f64(&seq[2], what)?,
    ])
}

fn parse_cells(model: &mut Model, value: &Value) -> Result<()> {
    let clauses = value
        .entries()
        .ok_or_else(|| RdError::ModelIo("cells must be a mapping".into()))?;
    if clauses.is_empty() {
        return Err(RdError::ModelIo("cells specification is empty".into()));
    }

    for (clause, params) in clauses {
        match clause.as_str() {
            "wmvol" => {
                let name = match params.get("name") {
                    Some(n) => n
                        .as_scalar()
                        .ok_or_else(|| RdError::ModelIo("wmvol name must be a scalar".into()))?
                        .to_owned(),
                    None => model.cell_sets.unique_key("wmvol"),
                };
                let volume = scalar_f64(
                    params
                        .get("volume")
                        .ok_or_else(|| RdError::ModelIo("wmvol needs a volume".into()))?,
                    "wmvol volume",
                )?;
                model.add_wmvol(&name, volume)?;
            }
            "grid" => {
                let name = match params.get("name") {
                    Some(n) => n
                        .as_scalar()
                        .ok_or_else(|| RdError::ModelIo("grid name must be a scalar".into()))?
                        .to_owned(),
                    None => model.cell_sets.unique_key("grid"),
                };
                let scale = match params.get("scale") {
                    Some(s) => scalar_f64(s, "grid scale")?,
                    None => 1.0,
                };
                let extent = params
                    .get("extent")
                    .and_then(Value::as_seq)
                    .filter(|s| s.len() == 2)
                    .ok_or_else(|| {
                        RdError::ModelIo("grid extent must be a pair of corner points".into())
                    })?;
                let lo = parse_point(&extent[0], "grid extent corner")?;
                let hi = parse_point(&extent[1], "grid extent corner")?;
                let counts = params
                    .get("counts")
                    .and_then(Value::as_seq)
                    .filter(|s| s.len() == 3)
                    .ok_or_else(|| {
                        RdError::ModelIo("grid counts must be a [nx,ny,nz] triple".into())
                    })?;
                let counts = [
                    scalar_usize(&counts[0], "grid count")?,
                    scalar_usize(&counts[1], "grid count")?,
                    scalar_usize(&counts[2], "grid count")?,
                ];
                model.add_grid(&name, scale, [lo, hi], counts)?;
            }
            other => {
                return Err(RdError::ModelIo(format!(
                    "unknown cells specification {other:?}"
                )));
            }
        }
    }
    Ok(())
}

fn parse_species(model: &mut Model, value: &Value) -> Result<()> {
    let entries = value
        .entries()
        .ok_or_else(|| RdError::ModelIo("species must be a mapping".into()))?;

    let mut name = None;
    let mut diffusivity = 0.0;
    let mut concentration = 0.0;
    for (key, v) in entries {
        match key.as_str() {
            "name" => {
                name = Some(
                    v.as_scalar()
                        .ok_or_else(|| RdError::ModelIo("species name must be a scalar".into()))?
                        .to_owned(),
                );
            }
            "diffusivity" => diffusivity = scalar_f64(v, "species diffusivity")?,
            "concentration" => concentration = scalar_f64(v, "species concentration")?,
            other => {
                return Err(RdError::ModelIo(format!(
                    "unknown species attribute {other:?}"
                )));
            }
        }
    }

    let name = name.ok_or_else(|| RdError::ModelIo("species needs a name".into()))?;
    model.species.insert(Species {
        name,
        diffusivity,
        concentration,
    })?;
    Ok(())
}

fn species_list(model: &Model, value: Option<&Value>, what: &str) -> Result<Vec<usize>> {
    let seq = value
        .and_then(Value::as_seq)
        .ok_or_else(|| RdError::ModelIo(format!("{what} must be a list of species names")))?;

    seq.iter()
        .map(|item| {
            let name = item
                .as_scalar()
                .ok_or_else(|| RdError::ModelIo(format!("{what} must contain species names")))?;
            model
                .species
                .index_of(name)
                .ok_or_else(|| RdError::ModelIo(format!("unknown species {name:?} in {what}")))
        })
        .collect()
}

fn parse_reaction(model: &mut Model, value: &Value) -> Result<()> {
    if value.entries().is_none() {
        return Err(RdError::ModelIo("reaction must be a mapping".into()));
    }
    for (key, _) in value.entries().unwrap() {
        if !matches!(key.as_str(), "name" | "left" | "right" | "rate") {
            return Err(RdError::ModelIo(format!(
                "unknown reaction attribute {key:?}"
            )));
        }
    }

    let name = match value.get("name") {
        Some(n) => n
            .as_scalar()
            .ok_or_else(|| RdError::ModelIo("reaction name must be a scalar".into()))?
            .to_owned(),
        None => model.reactions.unique_key("_r"),
    };

    let left = species_list(model, value.get("left"), "reaction left side")?;
    let right = species_list(model, value.get("right"), "reaction right side")?;

    // forward rate, optionally followed by a reverse rate
    let rates = match value.get("rate") {
        Some(Value::Scalar(_)) => vec![scalar_f64(value.get("rate").unwrap(), "reaction rate")?],
        Some(Value::Seq(items)) if (1..=2).contains(&items.len()) => items
            .iter()
            .map(|v| scalar_f64(v, "reaction rate"))
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(RdError::ModelIo(format!(
                "reaction {name:?} needs a rate of one or two entries"
            )));
        }
    };

    model.reactions.insert(Reaction {
        name: name.clone(),
        left: left.clone(),
        right: right.clone(),
        rate: rates[0],
    })?;

    if rates.len() > 1 {
        let reverse = model.reactions.unique_key(&format!("{name}_rev"));
        model.reactions.insert(Reaction {
            name: reverse,
            left: right,
            right: left,
            rate: rates[1],
        })?;
    }
    Ok(())
}

/// Assembles one parsed document into a validated model.
fn assemble(doc: &Value) -> Result<Model> {
    let entries = doc
        .entries()
        .ok_or_else(|| RdError::ModelIo("model document must be a mapping".into()))?;

    let mut model = Model::default();
    model.name = doc
        .get("model")
        .and_then(Value::as_scalar)
        .ok_or_else(|| RdError::ModelIo("model document needs a model name".into()))?
        .to_owned();

    // species and geometry first, then reactions, so reactions can
    // resolve species regardless of clause order
    for (key, value) in entries {
        match key.as_str() {
            "model" | "reaction" => {}
            "cells" => parse_cells(&mut model, value)?,
            "species" => parse_species(&mut model, value)?,
            other => return Err(RdError::ModelIo(format!("unknown key {other:?}"))),
        }
    }
    for (key, value) in entries {
        if key == "reaction" {
            parse_reaction(&mut model, value)?;
        }
    }

    model.validate()?;
    Ok(model)
}

/// Loads a model from a stream of documents, selecting by name.
///
/// With no name given the stream must contain exactly one model;
/// with a name, the first document carrying it is taken.
pub fn load_model(input: &str, model_name: Option<&str>) -> Result<Model> {
    let documents = parse_documents(input)?;

    let candidates: Vec<&Value> = documents
        .iter()
        .filter(|doc| doc.get("model").and_then(Value::as_scalar).is_some())
        .collect();

    match model_name {
        None => match candidates.len() {
            0 => Err(RdError::ModelIo("model specification not found".into())),
            1 => assemble(candidates[0]),
            _ => Err(RdError::ModelIo(
                "stream contains multiple models; select one by name".into(),
            )),
        },
        Some(name) => candidates
            .iter()
            .find(|doc| doc.get("model").and_then(Value::as_scalar) == Some(name))
            .map(|doc| assemble(doc))
            .unwrap_or_else(|| Err(RdError::ModelIo(format!("model {name:?} not found")))),
    }
}

/// Reads the whole stream and loads a model from it.
pub fn read_model(mut reader: impl Read, model_name: Option<&str>) -> Result<Model> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    load_model(&input, model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: &str = "\
model: decay
cells:
  wmvol:
    volume: 1.0
species:
  name: A
  concentration: 100
reaction:
  name: decay
  left: [A]
  right: []
  rate: [1.0]
";

    #[test]
    fn parses_flow_sequences() {
        let (_, v) = parse_flow_value("[[0, 0, 0], [1e-6, 1, 1]]").unwrap();
        let outer = v.as_seq().unwrap();
        assert_eq!(outer.len(), 2);
        assert_eq!(
            outer[0].as_seq().unwrap()[1],
            Value::Scalar("0".to_owned())
        );
        assert_eq!(
            outer[1].as_seq().unwrap()[0],
            Value::Scalar("1e-6".to_owned())
        );
    }

    #[test]
    fn loads_a_single_document() {
        let model = load_model(DECAY, None).unwrap();
        assert_eq!(model.name, "decay");
        assert_eq!(model.n_species(), 1);
        assert_eq!(model.n_reactions(), 1);
        assert_eq!(model.n_cells(), 1);
        assert_eq!(model.species[0].concentration, 100.0);
        assert_eq!(model.reactions[0].left, vec![0]);
        assert!(model.reactions[0].right.is_empty());
    }

    #[test]
    fn repeated_clauses_accumulate() {
        let input = "\
model: pair
cells:
  wmvol:
    volume: 2.0
species:
  name: A
species:
  name: B
  diffusivity: 0.5
reaction:
  left: [A, A]
  right: [B]
  rate: [3.0]
";
        let model = load_model(input, None).unwrap();
        assert_eq!(model.n_species(), 2);
        assert_eq!(model.species.index_of("B"), Some(1));
        // the unnamed reaction gets a generated key
        assert_eq!(model.reactions[0].name, "_r");
        assert_eq!(model.reactions[0].left, vec![0, 0]);
    }

    #[test]
    fn reverse_rate_generates_mirror_reaction() {
        let input = "\
model: rev
cells:
  wmvol:
    volume: 1.0
species:
  name: A
species:
  name: B
reaction:
  name: iso
  left: [A]
  right: [B]
  rate: [2.0, 0.5]
";
        let model = load_model(input, None).unwrap();
        assert_eq!(model.n_reactions(), 2);
        let rev = &model.reactions[model.reactions.index_of("iso_rev").unwrap()];
        assert_eq!(rev.left, vec![1]);
        assert_eq!(rev.right, vec![0]);
        assert_eq!(rev.rate, 0.5);
    }

    #[test]
    fn selects_document_by_name() {
        let input = format!("{DECAY}---\nmodel: other\ncells:\n  wmvol:\n    volume: 1\n");
        assert_eq!(load_model(&input, Some("other")).unwrap().name, "other");
        assert_eq!(load_model(&input, Some("decay")).unwrap().name, "decay");
        assert!(load_model(&input, None).is_err());
        assert!(load_model(&input, Some("missing")).is_err());
    }

    #[test]
    fn grid_clause_builds_cells() {
        let input = "\
model: grid
cells:
  grid:
    extent: [[0, 0, 0], [4, 1, 1]]
    counts: [4, 1, 1]
species:
  name: A
  diffusivity: 1.0
";
        let model = load_model(input, None).unwrap();
        assert_eq!(model.n_cells(), 4);
        // interior cells have two x-neighbours
        assert_eq!(model.cells[1].neighbours.len(), 2);
        assert_eq!(model.cell_sets.index_of("grid"), Some(0));
    }

    #[test]
    fn rejects_unknown_keys_and_species() {
        let bad_key = "model: m\nbogus: 1\n";
        assert!(matches!(
            load_model(bad_key, None),
            Err(RdError::ModelIo(_))
        ));

        let bad_species = "\
model: m
cells:
  wmvol:
    volume: 1
reaction:
  left: [Missing]
  right: []
  rate: [1]
";
        assert!(load_model(bad_species, None).is_err());
    }

    #[test]
    fn rejects_negative_rate() {
        let input = "\
model: m
cells:
  wmvol:
    volume: 1
species:
  name: A
reaction:
  left: [A]
  right: []
  rate: [-1]
";
        assert!(matches!(
            load_model(input, None),
            Err(RdError::InvalidModel(_))
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let input = "\
# a model with noise
model: noisy   # trailing comment

cells:
  wmvol:
    volume: 1.0  # unit volume
";
        let model = load_model(input, None).unwrap();
        assert_eq!(model.name, "noisy");
    }
}
