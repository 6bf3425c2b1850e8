//! Prompt templates for the three research steps
//!
//! Every template opens with a fixed signature line. A step field that
//! contains one of these signatures holds the request prompt rather than the
//! provider's answer, see [`is_prompt_echo`].

pub const DEEP_RESEARCH_SIGNATURE: &str = "Conduct comprehensive deep research on the company";
pub const STRATEGIC_ANALYSIS_SIGNATURE: &str =
    "Using the deep research findings below, produce a strategic analysis";
pub const REPORT_SIGNATURE: &str = "Write a comprehensive executive research report";

pub const PROMPT_SIGNATURES: [&str; 3] = [
    DEEP_RESEARCH_SIGNATURE,
    STRATEGIC_ANALYSIS_SIGNATURE,
    REPORT_SIGNATURE,
];

/// True when `text` contains a request prompt instead of a response
pub fn is_prompt_echo(text: &str) -> bool {
    PROMPT_SIGNATURES.iter().any(|signature| text.contains(signature))
}

/// Step 1 prompt
pub fn deep_research_prompt(company_name: &str, website: Option<&str>) -> String {
    let website = website
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .unwrap_or("not provided");

    format!(
        r#"{signature} "{company}" (website: {website}).

Research the company using current, verifiable public sources and cover:

1. Company overview: what the company does, products and services, business model, size, headquarters, ownership and funding.
2. Market position: industry, key competitors, differentiators, target customers.
3. Recent developments from the last 12-18 months: product launches, partnerships, acquisitions, leadership changes, funding rounds, layoffs.
4. Strategic priorities: stated goals from leadership, investor communications, job postings and press releases.
5. Operational challenges: pain points, inefficiencies, regulatory pressure or scaling problems the company is likely facing.
6. Technology landscape: current technology stack, digital transformation initiatives, data and AI maturity.

Cite sources inline where possible. Be factual and specific; say explicitly when information could not be verified."#,
        signature = DEEP_RESEARCH_SIGNATURE,
        company = company_name.trim(),
        website = website,
    )
}

/// Step 2 prompt, requesting the fixed JSON structure
pub fn strategic_analysis_prompt(company_name: &str, deep_research: &str) -> String {
    format!(
        r#"{signature} for "{company}" that identifies where AI agents can create measurable business value.

# Deep Research Findings
{research}

# Output Format
Respond with a single JSON object and nothing else. Use exactly this structure:

{{
  "introduction": "100-1000 characters framing the company's current strategic situation",
  "strategic_imperatives": [
    {{
      "title": "short name of the imperative",
      "context": "why this matters to the company now, grounded in the research",
      "ai_agent_opportunity": "how an AI agent could address it",
      "expected_impact": "the measurable outcome to expect"
    }}
  ],
  "ai_agent_recommendations": {{
    "introduction": "one paragraph introducing the recommendations",
    "priorities": [
      {{
        "imperative_reference": "title of the strategic imperative this addresses",
        "title": "name of the AI agent",
        "use_case": "what the agent does day to day",
        "business_impact": "quantified or concrete business impact"
      }}
    ]
  }},
  "expected_business_impact": ["impact statement", "impact statement", "impact statement"]
}}

Requirements:
- exactly 2 entries in "strategic_imperatives"
- exactly 2 entries in "ai_agent_recommendations.priorities", one per imperative
- exactly 3 entries in "expected_business_impact"
- every string must be non-empty"#,
        signature = STRATEGIC_ANALYSIS_SIGNATURE,
        company = company_name.trim(),
        research = deep_research.trim(),
    )
}

/// Step 3 prompt
pub fn report_prompt(company_name: &str, deep_research: &str, strategic_analysis: &str) -> String {
    format!(
        r#"{signature} on "{company}" for a sales team preparing personalized outreach.

# Deep Research
{research}

# Strategic Analysis (JSON)
{analysis}

# Report Structure
Use markdown headings and write in clear, professional prose:

# {company}: Strategic Research Report
## Executive Summary
## Company Overview
## Strategic Imperatives
## AI Agent Opportunities
## Expected Business Impact
## Recommended Outreach Angles

Ground every claim in the material above. Do not invent figures; keep numbers exactly as they appear in the research."#,
        signature = REPORT_SIGNATURE,
        company = company_name.trim(),
        research = deep_research.trim(),
        analysis = strategic_analysis.trim(),
    )
}
