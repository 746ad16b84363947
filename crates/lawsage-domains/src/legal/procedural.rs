//! Jurisdiction court rules, filing deadlines and county local rules.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProceduralRule {
    pub rule: &'static str,
    pub deadline: &'static str,
    pub authority: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRule {
    pub id: &'static str,
    pub title: &'static str,
    pub content: &'static str,
}

pub const NO_RULES_GUIDE: &str = "No specific procedural rules found for this jurisdiction in the local database. \
Please consult local court rules.";
pub const DEFAULT_CHECKLIST_ITEM: &str = "Verify local court rules and standing orders.";

const CALIFORNIA: &[ProceduralRule] = &[
    ProceduralRule {
        rule: "Demurrer",
        deadline: "Must be filed within 30 days of service of complaint.",
        authority: "CCP § 430.10",
    },
    ProceduralRule {
        rule: "Motion to Strike",
        deadline: "Must be filed within 30 days of service of complaint.",
        authority: "CCP § 435",
    },
    ProceduralRule {
        rule: "Discovery Responses",
        deadline: "30 days after service of discovery requests (plus 5 days if served by mail).",
        authority: "CCP § 2030.260",
    },
    ProceduralRule {
        rule: "Summary Judgment",
        deadline: "Notice must be served at least 75 days before hearing.",
        authority: "CCP § 437c(a)(2)",
    },
];

const FEDERAL_NINTH: &[ProceduralRule] = &[
    ProceduralRule {
        rule: "Answer to Complaint",
        deadline: "21 days after being served with summons and complaint.",
        authority: "FRCP 12(a)(1)(A)(i)",
    },
    ProceduralRule {
        rule: "Rule 26(f) Conference",
        deadline: "At least 21 days before a scheduling conference is held.",
        authority: "FRCP 26(f)",
    },
    ProceduralRule {
        rule: "Motion for New Trial",
        deadline: "No later than 28 days after the entry of judgment.",
        authority: "FRCP 59(b)",
    },
];

const NEW_YORK: &[ProceduralRule] = &[
    ProceduralRule {
        rule: "Answer",
        deadline: "20 days if served in person; 30 days if served by other means.",
        authority: "CPLR 3012",
    },
    ProceduralRule {
        rule: "Motion to Dismiss",
        deadline: "Before the responsive pleading is required.",
        authority: "CPLR 3211",
    },
];

const RULE_TABLE: &[(&str, &[ProceduralRule])] = &[
    ("California", CALIFORNIA),
    ("Federal (9th Circuit)", FEDERAL_NINTH),
    ("New York", NEW_YORK),
];

const LOS_ANGELES: &[LocalRule] = &[
    LocalRule {
        id: "LASC 3.10",
        title: "Mandatory Settlement Conference",
        content: "A mandatory settlement conference shall be held in every civil action, unless otherwise ordered by the court.",
    },
    LocalRule {
        id: "LASC 3.26",
        title: "Case Management Statement",
        content: "Each party must file a Case Management Statement at least 15 days before the scheduled Case Management Conference.",
    },
    LocalRule {
        id: "LASC 3.4",
        title: "Ex Parte Applications",
        content: "Ex parte applications must be filed by 10:00 a.m. the court day before the hearing, with notice provided by 10:00 a.m.",
    },
    LocalRule {
        id: "LASC 9.0",
        title: "Tentative Rulings",
        content: "Tentative rulings are generally available by 3:00 p.m. on the court day before the scheduled hearing.",
    },
    LocalRule {
        id: "LASC 3.5",
        title: "Remote Appearances",
        content: "Remote appearances are governed by CRC 3.670 and LASC local rules. Use of LACourtConnect is mandatory for most civil departments.",
    },
];

const LOCAL_TABLE: &[(&str, &[LocalRule])] = &[("Los Angeles County", LOS_ANGELES)];

/// First table entry whose name contains, or is contained in, `jurisdiction`
/// (case-insensitive).
pub fn match_jurisdiction(jurisdiction: &str) -> Option<(&'static str, &'static [ProceduralRule])> {
    let wanted = jurisdiction.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    RULE_TABLE
        .iter()
        .find(|(name, _)| {
            let name = name.to_lowercase();
            name.contains(&wanted) || wanted.contains(&name)
        })
        .copied()
}

/// Markdown guide of the jurisdiction's rules.
pub fn procedural_guide(jurisdiction: &str) -> String {
    let Some((name, rules)) = match_jurisdiction(jurisdiction) else {
        return NO_RULES_GUIDE.to_string();
    };
    let mut guide = format!("### Procedural Rules for {name}\n\n");
    for r in rules {
        guide.push_str(&format!("- **{}**: {} (Authority: {})\n", r.rule, r.deadline, r.authority));
    }
    guide
}

pub fn checklist(jurisdiction: &str) -> Vec<String> {
    match match_jurisdiction(jurisdiction) {
        Some((_, rules)) => rules.iter().map(|r| format!("{}: {}", r.rule, r.deadline)).collect(),
        None => vec![DEFAULT_CHECKLIST_ITEM.to_string()],
    }
}

pub fn local_rules(county: &str) -> &'static [LocalRule] {
    LOCAL_TABLE
        .iter()
        .find(|(name, _)| *name == county)
        .map(|(_, rules)| *rules)
        .unwrap_or(&[])
}

/// County with local rules on file that `text` names, matched on the name
/// without the "County" suffix.
pub fn county_mentioned(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    LOCAL_TABLE
        .iter()
        .map(|(name, _)| *name)
        .find(|name| lower.contains(name.to_lowercase().trim_end_matches(" county")))
}

pub fn format_local_rules(county: &str) -> String {
    let rules = local_rules(county);
    if rules.is_empty() {
        return format!("No specific local rules found for {county}.");
    }
    let mut out = format!("LOCAL RULES FOR {}:\n", county.to_uppercase());
    for r in rules {
        out.push_str(&format!("- {}: {}\n  {}\n", r.id, r.title, r.content));
    }
    out
}
