use rand::Rng;

use crate::error::NeedleBoxError;

const NAME_CANDIDATES: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NAME_LENGTH: usize = 8;

/// Generates a random file name consisting of the given prefix followed
/// by 8 uppercase alphanumeric characters.
pub(crate) fn rand_name(prefix: &str) -> String {
  let mut rng = rand::thread_rng();
  let mut name = String::with_capacity(prefix.len() + NAME_LENGTH);
  name.push_str(prefix);
  for _ in 0..NAME_LENGTH {
    let index = rng.gen_range(0..NAME_CANDIDATES.len());
    name.push(NAME_CANDIDATES[index] as char);
  }
  name
}

/// Splits text into trimmed lines, dropping the empty ones.
pub(crate) fn split_trimmed_lines(text: &str) -> Vec<&str> {
  text
    .split('\n')
    .map(|line| line.trim())
    .filter(|line| !line.is_empty())
    .collect()
}

/// A command line with `${variable}` placeholders.
///
/// The variable set is fixed at construction; referencing anything else
/// is the only error a template can raise after construction time.
#[derive(Debug, Clone)]
pub(crate) struct CommandTemplate {
  raw: String,
}

impl CommandTemplate {
  /// Parses a template, accepting only the listed variable names.
  pub(crate) fn new(template: &str, allowed: &[&str]) -> Result<CommandTemplate, NeedleBoxError> {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
      let tail = &rest[start + 2..];
      let end = tail
        .find('}')
        .ok_or_else(|| NeedleBoxError::template(format!("unclosed variable in `{}`", template)))?;
      let name = &tail[..end];
      if !allowed.contains(&name) {
        return Err(NeedleBoxError::template(format!(
          "unknown variable `{}` in `{}`",
          name, template
        )));
      }
      rest = &tail[end + 1..];
    }
    Ok(CommandTemplate {
      raw: template.to_string(),
    })
  }

  /// Substitutes every variable and returns the expanded command line.
  pub(crate) fn expand(&self, vars: &[(&str, &str)]) -> String {
    let mut line = self.raw.clone();
    for (name, value) in vars {
      line = line.replace(&format!("${{{}}}", name), value);
    }
    line
  }

  /// Expands and tokenizes with shell quoting rules.
  pub(crate) fn expand_split(&self, vars: &[(&str, &str)]) -> Result<Vec<String>, NeedleBoxError> {
    let argv = shell_words::split(&self.expand(vars))?;
    if argv.is_empty() {
      return Err(NeedleBoxError::template("empty command line"));
    }
    Ok(argv)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_generate_random_names() {
    let name = rand_name("src_");
    assert_eq!(name.len(), 4 + NAME_LENGTH);
    assert!(name.starts_with("src_"));
    assert!(name[4..]
      .bytes()
      .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    assert_ne!(rand_name("src_"), rand_name("src_"));
  }

  #[test]
  fn it_should_split_and_trim_lines() {
    assert_eq!(split_trimmed_lines("  3  \n\n"), vec!["3"]);
    assert_eq!(split_trimmed_lines("a\r\n b \n\n\nc"), vec!["a", "b", "c"]);
    assert!(split_trimmed_lines("\n \n\t\n").is_empty());
  }

  #[test]
  fn it_should_expand_templates() {
    let template = CommandTemplate::new("gcc -o ${output} -x c ${source}", &["source", "output"])
      .expect("template should parse");
    let line = template.expand(&[("source", "/tmp/a.c"), ("output", "/tmp/a.out")]);
    assert_eq!(line, "gcc -o /tmp/a.out -x c /tmp/a.c");
  }

  #[test]
  fn it_should_tokenize_with_quoting() {
    let template =
      CommandTemplate::new("sh -c \"cp ${source} ${output}\"", &["source", "output"])
        .expect("template should parse");
    let argv = template
      .expand_split(&[("source", "/tmp/a"), ("output", "/tmp/b")])
      .expect("split should work");
    assert_eq!(argv, vec!["sh", "-c", "cp /tmp/a /tmp/b"]);
  }

  #[test]
  fn it_should_reject_unknown_variables() {
    assert!(CommandTemplate::new("gcc ${sauce}", &["source"]).is_err());
    assert!(CommandTemplate::new("gcc ${source", &["source"]).is_err());
    assert!(CommandTemplate::new("gcc ${source}", &["source"]).is_ok());
  }

  #[test]
  fn it_should_reject_empty_command_lines() {
    let template = CommandTemplate::new("${output}", &["output"]).expect("template should parse");
    assert!(template.expand_split(&[("output", "")]).is_err());
  }
}
