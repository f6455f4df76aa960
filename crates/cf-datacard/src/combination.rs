//! Grouping elementary datacards into combined cards.
//!
//! A [`CardRegistry`] is built from one directory listing; plans are then
//! computed against the registry instead of re-scanning the file system.

use std::path::{Path, PathBuf};

use cf_core::{CommandRunner, CommandSpec, Error, Result};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::reader::ParsedDatacard;

/// Prefix of combined cards; such files never count as elementary cards.
pub const COMBINED_PREFIX: &str = "combined_";
const CARD_PREFIXES: &[&str] = &["datacard_", "card_"];
const CARD_SUFFIXES: &[&str] = &[".txt", "_card"];

/// Tool invoked to merge cards.
pub const COMBINE_CARDS: &str = "combineCards.py";

/// Channel label for an elementary card file name.
///
/// Strips the known prefixes/suffixes and replaces characters the fit tool
/// does not accept in bin names.
pub fn channel_label(file_name: &str) -> String {
    let mut s = file_name;
    for suffix in CARD_SUFFIXES {
        s = s.strip_suffix(suffix).unwrap_or(s);
    }
    for prefix in CARD_PREFIXES {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped;
            break;
        }
    }
    s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

/// One elementary card known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardEntry {
    /// File name inside the registry directory
    pub file_name: String,
    /// Derived channel label
    pub label: String,
}

/// In-memory list of the elementary cards of one directory.
#[derive(Debug, Clone)]
pub struct CardRegistry {
    dir: PathBuf,
    cards: Vec<CardEntry>,
}

impl CardRegistry {
    /// List `*.txt` cards in `dir` (combined cards excluded), sorted by name.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|n| n.ends_with(".txt") && !n.starts_with(COMBINED_PREFIX))
            .collect();
        names.sort();
        log::debug!("registry {}: {} elementary cards", dir.display(), names.len());
        Ok(Self::from_names(dir, names))
    }

    /// Registry from known file names (no file-system access).
    pub fn from_names<I, S>(dir: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cards = names
            .into_iter()
            .map(Into::into)
            .map(|file_name: String| CardEntry { label: channel_label(&file_name), file_name })
            .collect();
        Self { dir: dir.to_path_buf(), cards }
    }

    /// Directory the cards live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cards in name order.
    pub fn cards(&self) -> &[CardEntry] {
        &self.cards
    }
}

/// String predicate over card file names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingRule {
    /// Substring of the file name
    Contains(String),
    /// Exact `_`-separated token of the file stem
    Token(String),
    /// Data-taking year, as a token
    Year(String),
    /// Glob over the file name
    Glob(String),
    /// All sub-rules match
    AllOf(Vec<GroupingRule>),
    /// At least one sub-rule matches
    AnyOf(Vec<GroupingRule>),
    /// Sub-rule does not match
    Not(Box<GroupingRule>),
}

/// Compiled form of [`GroupingRule`].
enum Matcher {
    Contains(String),
    Token(String),
    Glob(GlobMatcher),
    AllOf(Vec<Matcher>),
    AnyOf(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    fn compile(rule: &GroupingRule) -> Result<Self> {
        Ok(match rule {
            GroupingRule::Contains(s) => Matcher::Contains(s.clone()),
            GroupingRule::Token(s) | GroupingRule::Year(s) => Matcher::Token(s.clone()),
            GroupingRule::Glob(p) => Matcher::Glob(
                Glob::new(p)
                    .map_err(|e| Error::Validation(format!("bad glob '{p}': {e}")))?
                    .compile_matcher(),
            ),
            GroupingRule::AllOf(rules) => {
                Matcher::AllOf(rules.iter().map(Matcher::compile).collect::<Result<_>>()?)
            }
            GroupingRule::AnyOf(rules) => {
                Matcher::AnyOf(rules.iter().map(Matcher::compile).collect::<Result<_>>()?)
            }
            GroupingRule::Not(rule) => Matcher::Not(Box::new(Matcher::compile(rule)?)),
        })
    }

    fn is_match(&self, file_name: &str) -> bool {
        match self {
            Matcher::Contains(s) => file_name.contains(s.as_str()),
            Matcher::Token(t) => {
                let stem = file_name.strip_suffix(".txt").unwrap_or(file_name);
                stem.split('_').any(|tok| tok == t)
            }
            Matcher::Glob(g) => g.is_match(file_name),
            Matcher::AllOf(ms) => ms.iter().all(|m| m.is_match(file_name)),
            Matcher::AnyOf(ms) => ms.iter().any(|m| m.is_match(file_name)),
            Matcher::Not(m) => !m.is_match(file_name),
        }
    }
}

/// A combined card to produce and the rule selecting its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationRule {
    /// Combined card name
    pub name: String,
    /// Member selection
    pub rule: GroupingRule,
}

/// Member of a combined card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardMember {
    /// Elementary card file name
    pub file_name: String,
    /// Channel label inside the combined model
    pub label: String,
}

/// One combined card: name plus ordered members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedCard {
    /// Combined card name
    pub name: String,
    /// Members, in registry order
    pub members: Vec<CardMember>,
}

impl CombinedCard {
    /// File name of the materialized card.
    pub fn file_name(&self) -> String {
        format!("{COMBINED_PREFIX}{}.txt", self.name)
    }

    /// The card-combination command, run from the card directory.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(COMBINE_CARDS)
            .args(self.members.iter().map(|m| format!("{}={}", m.label, m.file_name)))
            .redirect(self.file_name(), format!("{COMBINED_PREFIX}{}.log", self.name))
    }
}

/// Combined cards to build from one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinationPlan {
    /// Combined cards, in rule order
    pub cards: Vec<CombinedCard>,
}

impl CombinationPlan {
    /// Combined card by name.
    pub fn get(&self, name: &str) -> Option<&CombinedCard> {
        self.cards.iter().find(|c| c.name == name)
    }

    /// Reject combinations without members.
    pub fn validate(&self) -> Result<()> {
        for card in &self.cards {
            if card.members.is_empty() {
                return Err(Error::EmptyCombination(card.name.clone()));
            }
        }
        Ok(())
    }
}

/// Compute the members of each combination.
///
/// Empty combinations are kept in the plan; [`materialize`] rejects them.
pub fn plan(registry: &CardRegistry, rules: &[CombinationRule]) -> Result<CombinationPlan> {
    let mut cards = Vec::with_capacity(rules.len());
    for rule in rules {
        if cards.iter().any(|c: &CombinedCard| c.name == rule.name) {
            return Err(Error::Validation(format!("combination '{}' defined twice", rule.name)));
        }
        let matcher = Matcher::compile(&rule.rule)?;
        let mut members: Vec<CardMember> = Vec::new();
        for entry in registry.cards().iter().filter(|e| matcher.is_match(&e.file_name)) {
            if members.iter().any(|m| m.label == entry.label) {
                return Err(Error::DuplicateChannelLabel {
                    combination: rule.name.clone(),
                    label: entry.label.clone(),
                });
            }
            members.push(CardMember { file_name: entry.file_name.clone(), label: entry.label.clone() });
        }
        if members.is_empty() {
            log::warn!("combination '{}' matches no cards", rule.name);
        }
        cards.push(CombinedCard { name: rule.name.clone(), members });
    }
    Ok(CombinationPlan { cards })
}

/// Scan `dir` and plan in one step.
pub fn plan_directory(dir: &Path, rules: &[CombinationRule]) -> Result<CombinationPlan> {
    plan(&CardRegistry::scan(dir)?, rules)
}

/// Run the card-combination tool once per combined card.
///
/// The whole plan is validated (non-empty, every member card parses) before
/// the first command is issued.
pub fn materialize(
    plan: &CombinationPlan,
    dir: &Path,
    runner: &mut dyn CommandRunner,
) -> Result<Vec<PathBuf>> {
    plan.validate()?;
    for card in &plan.cards {
        for member in &card.members {
            ParsedDatacard::read(&dir.join(&member.file_name))?;
        }
    }

    let mut outputs = Vec::with_capacity(plan.cards.len());
    for card in &plan.cards {
        let command = card.command();
        let code = runner.run(&command, dir)?;
        if code != 0 {
            return Err(Error::FitExecution {
                command: command.to_shell(),
                reason: format!("exit code {code}"),
            });
        }
        let path = dir.join(card.file_name());
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(Error::FitExecution {
                command: command.to_shell(),
                reason: format!("{} is missing or empty", path.display()),
            });
        }
        log::info!("combined {} cards into {}", card.members.len(), path.display());
        outputs.push(path);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CardRegistry {
        CardRegistry::from_names(
            Path::new("/cards"),
            [
                "datacard_CR_ttZ_2016.txt",
                "datacard_SR_2016.txt",
                "datacard_SR_2017.txt",
                "datacard_SR_2018.txt",
            ],
        )
    }

    #[test]
    fn test_channel_label() {
        assert_eq!(channel_label("datacard_SR_2016.txt"), "SR_2016");
        assert_eq!(channel_label("card_SR-high.txt"), "SR_high");
        assert_eq!(channel_label("SR_2016_card.txt"), "SR_2016");
    }

    #[test]
    fn test_plan_by_year_and_region() {
        let rules = vec![
            CombinationRule { name: "y2016".into(), rule: GroupingRule::Year("2016".into()) },
            CombinationRule {
                name: "SR_run2".into(),
                rule: GroupingRule::AllOf(vec![
                    GroupingRule::Token("SR".into()),
                    GroupingRule::Not(Box::new(GroupingRule::Contains("2018".into()))),
                ]),
            },
            CombinationRule { name: "all".into(), rule: GroupingRule::Glob("datacard_*.txt".into()) },
        ];
        let plan = plan(&registry(), &rules).unwrap();
        let labels = |name: &str| -> Vec<String> {
            plan.get(name).unwrap().members.iter().map(|m| m.label.clone()).collect()
        };
        assert_eq!(labels("y2016"), vec!["CR_ttZ_2016", "SR_2016"]);
        assert_eq!(labels("SR_run2"), vec!["SR_2016", "SR_2017"]);
        assert_eq!(labels("all").len(), 4);
        plan.validate().unwrap();
    }

    #[test]
    fn test_empty_combination_fails_before_running() {
        struct NeverRun;
        impl CommandRunner for NeverRun {
            fn run(&mut self, command: &CommandSpec, _: &Path) -> Result<i32> {
                panic!("no command expected, got {command}");
            }
        }

        let rules = vec![
            CombinationRule { name: "y2016".into(), rule: GroupingRule::Year("2016".into()) },
            CombinationRule { name: "y2022".into(), rule: GroupingRule::Year("2022".into()) },
        ];
        let plan = plan(&registry(), &rules).unwrap();
        let err = materialize(&plan, Path::new("/cards"), &mut NeverRun).unwrap_err();
        assert!(matches!(err, Error::EmptyCombination(name) if name == "y2022"));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let reg = CardRegistry::from_names(Path::new("."), ["datacard_SR.txt", "card_SR.txt"]);
        let rules = vec![CombinationRule { name: "x".into(), rule: GroupingRule::Contains("SR".into()) }];
        assert!(matches!(plan(&reg, &rules), Err(Error::DuplicateChannelLabel { .. })));
    }

    #[test]
    fn test_combine_command() {
        let plan = plan(
            &registry(),
            &[CombinationRule { name: "y2016".into(), rule: GroupingRule::Year("2016".into()) }],
        )
        .unwrap();
        assert_eq!(
            plan.cards[0].command().to_shell(),
            "combineCards.py CR_ttZ_2016=datacard_CR_ttZ_2016.txt SR_2016=datacard_SR_2016.txt \
             > combined_y2016.txt 2> combined_y2016.log"
        );
    }
}
