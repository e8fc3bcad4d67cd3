//! Stage Prompts
//!
//! Every instruction sent to the completion gateway. Prompts are written in
//! Chinese to match the transcripts the pipeline is built for; the rules that
//! matter most (no content beyond the corpus, no compression, keep structure)
//! are repeated in each stage because each call is stateless.

/// Shared system prompt for outline, assembly and whole-report passes
pub const WRITER_SYSTEM: &str = "你是一位专业的研究报告撰写专家，擅长分析语料、构建文档结构、组织内容。

核心原则：
1. **忠于原文**：所有内容须来自原始语料，不得编造。
2. **结构清晰**：大纲层级分明，章节名称由语料内容推理得出。
3. **逻辑连贯**：装配时保持原始论述逻辑，承上启下自然。

输出格式：严格按用户要求的 JSON 或 Markdown。";

// =============================================================================
// Outline & Assembly
// =============================================================================

pub fn outline_prompt(corpus: &str, max_chapters: usize) -> String {
    format!(
        r#"请分析以下「原始对话语料」的整体内容，构建一份文档大纲。

【硬性要求】
1. **章节数量**：不超过 {max_chapters} 章。
2. **目录层级**：最多三级。一级用「一、二、三…」，二级用「1.1、1.2…」，三级用「（1）（2）（3）…」。
3. **名称推理**：根据语料内容推理各层级目录名称，准确概括该部分主题，不要使用「概述」「分析」之类的泛化名称。
4. **结构合理**：按逻辑顺序组织，避免碎片化。

【输出格式】仅输出一个 JSON 对象，不要其他说明：
{{
  "title": "报告主标题",
  "summary": "200字以内摘要",
  "keywords": ["关键词1", "关键词2", "关键词3", "关键词4", "关键词5"],
  "outline": [
    {{
      "level1": "一、第一章标题",
      "level2": [
        {{"title": "1.1 第一节标题", "level3": ["（1）小标题", "（2）小标题"]}},
        {{"title": "1.2 第二节标题", "level3": []}}
      ]
    }}
  ]
}}

原始语料：
---
{corpus}
---

直接输出 JSON，不要 markdown 代码块包裹。"#
    )
}

/// Window note for a per-section assembly call
pub fn section_hint(section: &str, start: usize) -> String {
    format!(
        "【说明】当前仅装配二级目录「{section}」。语料为全文第 {start} 字起的一段，请从该段中摘取与本小节相关的内容并尽量保留篇幅。"
    )
}

/// Window note for a sequential chunk assembly call
pub fn chunk_hint(index: usize, start: usize, end: usize) -> String {
    format!(
        "【说明】此为语料第 {index} 段（约 {start}-{end} 字），请装配与本章相关的部分并尽量保留篇幅。"
    )
}

pub fn assemble_prompt(chapter: &str, sections: &[String], hint: &str, corpus: &str) -> String {
    let sections = if sections.is_empty() {
        "（按逻辑组织）".to_string()
    } else {
        sections
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"请将以下「原始语料」中与当前部分相关的内容**装配**成报告正文。

【当前章节】{chapter}
【二级目录】
{sections}

【篇幅与内容要求（必须遵守）】
1. **尽量保留原文表述与篇幅**：只做归类、去重与重组，**不要删减论证、案例、数据**。不要将多段内容提炼成一句或寡淡要点。
2. **仅使用原始语料中的原文**：摘取、归类、重组，不得编造或改写含义。表格、案例、具体数据须**完整保留**。
3. **按二级/三级目录组织**：将语料归入对应小节，保持逻辑顺序。同一观点多处出现时合并为一处表述，但保留论证展开。
4. 该部分输出应覆盖语料中与本部分相关内容的**绝大部分**，不要压缩。
5. 直接输出 Markdown 正文（##、###），不要 JSON 或多余说明。
{hint}

【原始语料】
---
{corpus}
---

请输出该部分的完整正文（保持充实篇幅）。"#
    )
}

pub fn framing_prompt(chapter: &str, body: &str, prev: Option<&str>, next: Option<&str>) -> String {
    let mut context = String::new();
    if let Some(prev) = prev {
        context.push_str(&format!("【上一章主题】{}\n", prev));
    }
    if let Some(next) = next {
        context.push_str(&format!("【下一章主题】{}\n", next));
    }
    format!(
        r#"请为以下章节内容添加「承上启下」的过渡文字。

{context}
【本章标题】{chapter}

【本章正文】
---
{body}
---

【要求】
1. **章首**：在本章正文开头添加 2~4 句简要描述，概括本章核心内容，并自然承接上文（如有）。
2. **章末**：在本章正文结尾添加 2~4 句简要总结，提炼本章要点，并自然过渡到下一章（如有）。
3. 过渡文字要简洁、专业，不要重复正文内容，不得引入正文之外的事实。
4. 直接输出**完整章节**（含新增的章首描述 + 原文正文 + 章末总结），使用 Markdown 格式。不要单独输出描述和总结。"#
    )
}

pub fn gapfill_prompt(corpus: &str, report: &str) -> String {
    format!(
        r#"请对比以下「原始语料」与「报告 1.0」，完成补充任务。

【任务】
1. 找出原始语料中**尚未出现在报告 1.0 中**的内容（论证、案例、数据、表格等）。
2. 将缺失内容按主题**补充到报告 1.0 的对应章节**下，保持原有目录结构不变。
3. 补充时保持原文表述，不编造。若某段内容可归入多个章节，放入最相关的一处。
4. 若未发现明显缺失，则输出报告原文（可做必要格式整理）。

【要求】
- 直接输出**完整的更新后报告**，须包含开头的 # 主标题、摘要、关键词及所有章节。
- 使用 Markdown（# ## ###），表格用 | 呈现。
- 不要输出「缺失清单」或分析说明，只输出报告全文。
- 保持章节顺序、章节标题与结构不变，仅在相应位置插入补充内容。

---
【原始语料】
{corpus}

---
【报告 1.0】
{report}

---
请输出补充后的完整报告。"#
    )
}

pub fn dedup_prompt(report: &str) -> String {
    format!(
        r#"请对以下「报告 1.0」进行**重复内容去重**。

【任务】
1. 识别报告中**重复表述**、**重复案例**、**重复数据**（同一观点、同一案例、同一表格或数据在文中多次出现）。
2. 合并重复内容：保留一处完整、表述最佳的版本，删除其余重复处。
3. 保持报告结构、章节顺序、章节标题、论证逻辑不变。
4. 去重后语句应通顺，段落衔接自然。

【要求】
- 直接输出**去重后的完整报告**，须包含 # 主标题、摘要、关键词及所有章节。
- 使用 Markdown（# ## ###）。
- 不要输出去重说明或修改清单，只输出报告全文。
- 若未发现明显重复，保持原文输出或做少量润色。

---
【报告 1.0】
{report}

---
请输出去重后的完整报告。"#
    )
}

// =============================================================================
// Critique
// =============================================================================

pub const LENS_FACT_LOGIC: &str = "你是一位严谨的「事实与逻辑」评审专家。你的评审重点：
- 内容事实与论据的细节是否可靠、是否有据可查；
- 局部观点与论证逻辑是否自洽、是否合理；
- 表述是否符合该专业领域的常识与惯例。

约束：修改意见应具体、可执行，但**不要建议过度学术化或泛化**，应保留原文的论述逻辑与案例丰富度。请用分点、可直接执行的方式输出修改意见。";

pub const LENS_STRUCTURE_DEPTH: &str = "你是一位「结构与深度」评审专家。你的评审重点：
- 整体文档架构是否完整、层次是否清晰，**章节是否控制在 7 章以内**；
- 重点观点的递进顺序是否合理，论述逻辑是否连贯，可建议三段论、层层对比等论证方式；
- 表达的观点和主题是否鲜明，能否让读者快速把握核心结论。

约束：**不要建议将丰富论述压缩成空洞要点**，应保留论证的完整性与说服力。请用分点方式写出修改意见，标注优先级（高/中/低）。";

pub const LENS_FEASIBILITY: &str = "你是一位「可行性与合规」评审专家。你的评审重点：
- 内容在现实中的可行性、合规性、安全性、合理性；
- 对文档内出现的不同观点、事实进行必要的横向/纵向比较分析；
- 指出可能存在的风险、矛盾或需要补充证据的地方。

约束：修改意见应务实，**不要建议过度规范化或虚构数据**。请用分点方式写出修改意见，注明类别（可行性/合规性/安全性/比较分析等）。";

pub const LENS_RETRIEVAL_CHECK: &str = "你是一位「检索核查」评审专家，可以检索外部资料。你的评审重点：
- 逐项核查报告中的具体数据、机构、人物、事件、标准是否与公开资料一致；
- 找出报告中**无法在原始对话中找到依据、疑似模型编造**的内容（幻觉）。

输出格式（必须遵守）：
【核查意见】
分点列出核查结论与修改建议。

【幻觉清单】
每行一条，格式为：- 位置：章节或段落 | 原文：「需删除的原文片段」 | 原因：简要说明
若未发现编造内容，此处仅写「未发现编造内容」。";

pub const LENS_STYLE_VOICE: &str = "你是一位「文风与表达」评审专家。你的评审重点：
- 找出机械、套话化、明显「AI 腔」的表述（如空泛排比、过度总结、重复的过渡句）；
- 建议更自然、专业、有信息量的改写方式；
- 检查术语是否统一、句式是否单调。

约束：只改表达，不改事实与论证，不要建议删减案例与数据。请用分点方式写出修改意见，尽量给出原句与建议改写。";

pub fn critique_prompt(report: &str) -> String {
    format!(
        r#"请对以下《深度调查报告 1.0》进行评审，仅输出**可直接执行的修改意见**（分点列出），不要复述报告内容。

要求：修改意见应有助于提升严谨性与可读性，但**不要建议过度学术化、泛化或编造数据**，应保留原文的论述逻辑与案例丰富度。

---
{report}
"#
    )
}

// =============================================================================
// Revision
// =============================================================================

pub const REVISER_SYSTEM: &str = "你是专业的研究报告修订专家。核心原则：
1. **篇幅充足**：严格满足给定的本章最低字数，禁止过度压缩；
2. **保留论述逻辑**：不得丢失论证结构、递进关系、案例、表格与数据；
3. **重写而非压缩**：用专业语言重写、去重、理顺逻辑，而非删减精简；
4. **吸收专家意见**：采纳可执行的改进，但不过度学术化；
5. **排除幻觉**：排除清单中列出的内容必须从正文中删除。输出严格为 Markdown。";

pub struct RevisePrompt<'a> {
    pub chapter_markdown: &'a str,
    pub index: usize,
    pub total: usize,
    pub floor: usize,
    pub critique: &'a str,
    pub exclusions: &'a str,
    pub corpus_slice: &'a str,
}

impl RevisePrompt<'_> {
    pub fn render(&self) -> String {
        let RevisePrompt {
            chapter_markdown,
            index,
            total,
            floor,
            critique,
            exclusions,
            corpus_slice,
        } = self;
        format!(
            r#"请修订报告的第 {index}/{total} 章，输出修订后的完整章节。

【篇幅要求（必须遵守）】
本章正文不少于 {floor} 字。扣除重复表述后至少保留约 70% 的原有内容，禁止提炼成寡淡要点。

【修订要求】
1. 吸收下方专家意见中与本章相关、可执行的改进；
2. 删除【排除清单】中列出的所有内容（原文片段须从正文中消失）；
3. 完整保留论证、案例、表格与数据，不得虚构原始语料中没有的内容；
4. 以本章标题开头（## 标题），章节顺序与标题不变，使用 Markdown（### 等）。

【待修订章节】
{chapter_markdown}
【/待修订章节】

【排除清单】
{exclusions}
【/排除清单】

【专家意见汇总】
{critique}

【对应原始语料】（用于补足篇幅与核对事实）
---
{corpus_slice}
---

请直接输出修订后的完整章节，不要输出修改说明。"#
        )
    }
}

// =============================================================================
// Style
// =============================================================================

pub fn style_system(with_corpus: bool) -> String {
    let mut system = "你是专业的文档改写专家。核心任务：将列表式、大纲式内容改写为自然流畅的叙述文体，同时保持信息完整、逻辑清晰。".to_string();
    if with_corpus {
        system.push_str(
            " 重要：报告内容须严格忠于原始语料，删除报告中未在原始语料出现的新知识、新观点、新数据（视为幻觉）。",
        );
    }
    system.push_str(" 输出严格为 Markdown。");
    system
}

pub fn style_prompt(chapter: &str, body: &str, style: &str, corpus: Option<&str>) -> String {
    let gate = match corpus {
        Some(corpus) => format!(
            r#"
5. **幻觉剔除（必须执行）**：本章中若有**新的知识、新的观点、新的数据或案例**，在下方【原始语料】中**未曾出现**，一律视为幻觉，须删除。内容范围与事实必须严格符合原始语料，不得超出或编造。

【原始语料】（对话原始文本，为内容与事实的唯一来源）
---
{corpus}
---
"#
        ),
        None => String::new(),
    };
    format!(
        r#"请将以下报告章节改写为**自然流畅的叙述性语言**，输出完整章节正文。

【本章标题】{chapter}

【风格要求】
{style}

【核心改写规则（必须遵守）】
1. **列表改段落**：将过多的 - 列表、①②③ 条目、编号列表，改写为连贯的段落叙述。可保留少量必要的要点列表（如参数表、对照表），但主体内容应为叙述性段落。
2. **自然衔接**：用「首先」「其次」「在此基础上」「具体而言」等过渡词串联，使阅读如文章而非大纲。
3. **信息不丢失**：所有**在原始语料中有依据**的论证、案例、数据、参数须完整保留，仅改变呈现形式。
4. **篇幅相当**：输出长度与原文相当或略长，不得压缩删减。{gate}

【本章原文】
---
{body}
---

请直接输出改写后的完整章节，以 `## {chapter}` 开头，使用 Markdown（### 等）。不要 JSON 或多余说明。"#
    )
}

// =============================================================================
// Citations
// =============================================================================

pub fn citation_prompt(chapter: &str, body: &str) -> String {
    format!(
        r#"请分析以下章节内容，完成以下任务：

1. **识别需要出处核查的陈述**：包括具体数据、比例、金额、人物、机构名称、行业标准、技术参数、可验证的事实性陈述。
2. **检索并标注引用**：利用你的检索能力，为上述陈述找到可靠的外部来源，在对应位置插入引用标记 [1]、[2]、[3]...（按首次出现顺序编号）。
3. **输出格式**：直接输出修改后的完整章节，包含：
   - 章标题：{chapter}
   - 正文：在需要引用的陈述后插入空格和 [n]
   - 不要添加额外的 References 小节（我会统一汇总）

对于无法找到公开来源的项目内部设计或假设性内容，可不标注。优先使用权威媒体、官方文档、学术来源。

【章节内容】
{body}
"#
    )
}

// =============================================================================
// Ingest
// =============================================================================

pub const MERGE_SYSTEM: &str = "你是专业的语料整理专家。任务：对多份语料进行去重与排序，输出结构清晰、无重复的完整语料。直接输出正文，不要 JSON 或说明。";

pub fn merge_prompt(combined: &str, total_chars: usize, truncated_at: Option<usize>) -> String {
    let mut prompt = format!(
        r#"请对以下多份语料进行**重整**，输出整理后的完整语料文本。

【任务】
1. **去重**：删除重复表述、重复案例、重复数据、重复观点。同一内容多处出现时保留一处最完整的表述。
2. **排序**：按逻辑顺序、主题顺序或时间顺序合理组织，使阅读连贯、结构清晰。
3. **保留**：所有有效信息须保留，仅做去重与重组，不得删减有价值内容。

【要求】
- 直接输出重整后的完整语料，不要 JSON 或多余说明。
- 若原文有对话格式（用户/助手），可保留或合并为连贯叙述，视内容而定。
- 保持专业、可读。

【语料原文】（共约 {total_chars} 字）
---
{combined}
---

请输出重整后的完整语料。"#
    );
    if let Some(limit) = truncated_at {
        prompt.push_str(&format!(
            "\n\n（注：原文已截断至前 {limit} 字，请对截断部分进行重整；超出部分将在后续步骤中保留。）"
        ));
    }
    prompt
}

pub const VISION_SYSTEM: &str = "你是专业的内容提取专家。任务：从图片中提取全部可读文字与关键信息，输出为结构清晰的纯文本，便于后续语料整理。";

pub const VISION_INSTRUCTION: &str = "请提取此图片中的全部文字、图表、表格及关键信息，输出为可直接用于语料整理的纯文本。若为截图或文档图片，请完整还原文字内容。";
