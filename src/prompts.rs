//! Prompts for structure analysis and chunk extraction.
//!
//! Every prompt lives here so that changing what the model is asked for
//! means editing one file, and so tests can inspect prompts without a
//! backend. Callers can replace the system prompt through
//! [`crate::config::ExtractionConfig::system_prompt`].

use crate::pipeline::chunker::ContentChunk;
use crate::pipeline::processor::MarkerHints;

/// System message sent with every call by [`crate::backend::LlmBackend`].
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的学术论文解析助手，负责从论文文本中提取结构化信息。\
请始终只返回一个有效的 JSON 对象，不要使用 Markdown 代码块，不要添加任何解释。\
JSON 字符串中的反斜杠必须转义（例如 LaTeX 命令 \\section 写作 \\\\section）。";

// ── Structure analysis ───────────────────────────────────────────────────

/// Ask for the outline of a document of `total_chars` chars.
///
/// `excerpt` is the start of the document (title page, abstract); `outline`
/// lists every short line as `[@offset] text`, which is where the model
/// reads positions from.
pub fn structure_prompt(excerpt: &str, outline: &str, total_chars: usize) -> String {
    format!(
        r#"分析以下学术论文，**只提取文档结构**，不要提取正文内容。

全文共 {total_chars} 个字符。下面先给出论文开头部分，然后给出全文所有短行的列表，
每行前的 [@数字] 是该行在全文中的字符位置（从 0 开始计数）。

你需要识别：
1. 基本元数据（标题、作者等），通常在论文开头
2. 所有正文章节标题、层级及其起止位置
3. 摘要、参考文献、致谢的位置范围

输出 JSON 格式：

{{
  "metadata": {{
    "title": "论文标题",
    "author": "作者姓名",
    "school": "学院",
    "major": "专业",
    "supervisor": "指导教师",
    "date": "日期"
  }},
  "sections": [
    {{"title": "绪论", "level": 1, "startPos": 1234, "endPos": 5678}},
    {{"title": "研究背景", "level": 2, "startPos": 1500, "endPos": 2500}}
  ],
  "abstractRange": {{"start": 100, "end": 800}},
  "referencesRange": {{"start": 45000, "end": 48000}},
  "acknowledgementsRange": {{"start": 48000, "end": 49000}}
}}

**重要说明：**
1. startPos 取标题所在行的 [@数字]，endPos 取下一个章节开始之前的位置
2. **章节标题只保留纯文字，去掉编号前缀**：
   - "第一章 绪论" → "绪论"
   - "1.1 研究背景" → "研究背景"
   - "Chapter 1 Introduction" → "Introduction"
3. level: 1 表示一级标题（章），2 表示二级标题（节），3 表示三级标题
4. 目录中出现的标题不是章节，忽略目录
5. 某个范围不存在时设为 null
6. sections 只包含正文章节，不包含摘要、参考文献、致谢

论文开头：
{excerpt}

短行列表：
{outline}"#
    )
}

// ── Chunk extraction ─────────────────────────────────────────────────────

const METADATA_SCHEMA: &str = r#""metadata": {
    "title": "论文标题",
    "title_en": "英文标题（如有）",
    "author_name": "作者姓名",
    "student_id": "学号（如有）",
    "school": "学院/院系",
    "major": "专业",
    "supervisor": "指导教师",
    "date": "日期"
  }"#;

const ABSTRACT_SCHEMA: &str = r#""abstract": "中文摘要内容",
  "abstract_en": "英文摘要内容（如有）",
  "keywords": "关键词1、关键词2、关键词3",
  "keywords_en": "keyword1, keyword2, keyword3""#;

const SECTIONS_SCHEMA: &str = r#""sections": [
    {"title": "章节标题", "content": "章节内容...", "level": 1},
    {"title": "子节标题", "content": "子节内容...", "level": 2}
  ]"#;

const GENERAL_RULES: &str = r#"**重要说明：**
1. sections 数组包含论文的正文章节，按原文顺序排列
2. level: 1 表示一级标题（章），2 表示二级标题（节），3 表示三级标题
3. **章节标题只保留纯文字内容，去掉编号前缀**：
   - "第一章 绪论" → title: "绪论"
   - "1.1 研究背景" → title: "研究背景"
   - 编号会由 LaTeX 模板自动生成
4. 按原文实际结构提取，不要预设或套用固定的章节名称
5. 某个字段在内容中不存在时，返回空字符串 "" 或空数组 []
6. 保持学术语言的严谨性，不要改写或删减正文"#;

const FORMULA_RULES: &str = r#"**公式处理：**
- 文本中的公式可能被拆成多行或多个片段，并包含 Unicode 数学符号
- [FORMULA: ... :END_FORMULA] 和 [FORMULA_BLOCK: ... :END_FORMULA_BLOCK] 标记公式片段，相邻片段可能需要合并
- 分散的求和公式如 "𝑁\n∑\n𝐿= −\n𝑖=1\n𝑦𝑖log(𝑝𝑖)" 应写为 $$L = -\\sum_{i=1}^{N} y_i \\log(p_i)$$
- 独立公式用 $$...$$，行内公式用 $...$
- 常见转换：𝛼→\\alpha, ∑→\\sum, ∏→\\prod, ∫→\\int, √→\\sqrt, ≤→\\leq, ≥→\\geq, 𝑥ᵢ→x_i, 𝑥²→x^2"#;

const TABLE_RULES: &str = r#"**表格处理：**
- 表格可能以三种形式出现：Markdown 管道表格（| A | B |）、[TABLE cols=N][HEADER]…[/HEADER][ROW]…[/ROW][/TABLE]、
  或 [TABLE_START]…[TABLE_END]（单元格为 [TABLE_CELL: xxx]，可能带 [TABLE_ROW:n] 分行）
- 能确定列数时，转换为 LaTeX：
\\begin{table}[H]
\\centering
\\caption{根据上下文推断的表格标题}
\\begin{tabular}{|c|c|}
\\hline
列1 & 列2 \\\\ \\hline
数据1 & 数据2 \\\\ \\hline
\\end{tabular}
\\end{table}
- 不要输出 Markdown 表格
- **无法确定表格结构时，原样保留标记，不要删除**"#;

fn figure_rules(ids: &[String]) -> String {
    let list = ids.join(", ");
    format!(
        r#"**图片处理：**
文本中包含图片标记：{list}
每个 [FIGURE:xxx] 标记表示该位置有一张图片。请在对应章节的 content 中**原样保留这些标记**，
保持其在原文中的相对位置。只能使用上面列出的图片 ID，不要修改 ID，也不要创建其他图片引用。"#
    )
}

/// The extraction prompt for one chunk.
///
/// Only the first chunk is asked for metadata; later chunks are told to
/// return an empty object. Marker instructions are included only for the
/// marker kinds present in `hints`.
pub fn chunk_prompt(chunk: &ContentChunk, hints: &MarkerHints) -> String {
    let first = chunk.chunk_index == 0;
    let whole = chunk.full_document;

    let mut context = String::new();
    if chunk.total_chunks > 1 {
        context.push_str(&format!(
            "\n**注意：这是文档的第 {}/{} 部分。**\n",
            chunk.chunk_index + 1,
            chunk.total_chunks
        ));
        if !first {
            context.push_str("- 不需要再次提取 metadata，返回空对象即可\n");
        }
    }

    let mut fields: Vec<&str> = Vec::new();
    fields.push(if first { METADATA_SCHEMA } else { r#""metadata": {}"# });
    if whole || chunk.includes_abstract() {
        fields.push(ABSTRACT_SCHEMA);
    }
    fields.push(if whole || !chunk.sections.is_empty() {
        SECTIONS_SCHEMA
    } else {
        r#""sections": []"#
    });
    if whole || chunk.includes_references() {
        fields.push(r#""references": "参考文献列表，每条一行""#);
    }
    if whole || chunk.includes_acknowledgements() {
        fields.push(r#""acknowledgements": "致谢内容""#);
    }
    let schema = fields.join(",\n  ");

    let mut rules = vec![GENERAL_RULES.to_string()];
    if hints.formulas {
        rules.push(FORMULA_RULES.to_string());
    }
    if hints.tables {
        rules.push(TABLE_RULES.to_string());
    }
    if !hints.figure_ids.is_empty() {
        rules.push(figure_rules(&hints.figure_ids));
    }

    let content = if whole {
        let text = chunk.sections.first().map_or("", |s| s.content.as_str());
        format!("【论文全文】\n{text}\n")
    } else {
        content_blocks(chunk)
    };

    format!(
        "请从以下论文内容{}中提取结构化信息。\n{}\n输出 JSON 格式：\n\n{{\n  {}\n}}\n\n{}\n\n内容：\n{}",
        if whole { "" } else { "片段" },
        context,
        schema,
        rules.join("\n\n"),
        content
    )
}

fn content_blocks(chunk: &ContentChunk) -> String {
    let mut out = String::new();
    if let Some(ref abs) = chunk.abstract_content {
        out.push_str(&format!("【摘要部分】\n{abs}\n\n"));
    }
    for section in &chunk.sections {
        let kind = match section.level {
            1 => "章节",
            2 => "小节",
            _ => "子节",
        };
        out.push_str(&format!("【{kind}：{}】\n{}\n\n", section.title, section.content));
    }
    if let Some(ref ack) = chunk.acknowledgements_content {
        out.push_str(&format!("【致谢部分】\n{ack}\n\n"));
    }
    if let Some(ref refs) = chunk.references_content {
        out.push_str(&format!("【参考文献部分】\n{refs}\n\n"));
    }
    out
}

// ── Reference parsing ────────────────────────────────────────────────────

/// Ask for the merged reference list as typed entries.
///
/// The answer is an object `{"references": [...]}`; the field names match
/// [`crate::references::Reference`].
pub fn reference_prompt(raw_references: &str) -> String {
    format!(
        r#"请将以下参考文献文本解析为结构化 JSON。返回格式为 {{"references": [...]}}，按原文顺序排列。

每个参考文献对象包含以下字段：
- type: "journal" | "book" | "conference" | "thesis" | "website" | "standard" | "other"
- authors: 作者数组（字符串数组）
- title: 标题
- journal: 期刊名（期刊文章适用）
- publisher: 出版社（图书适用）
- publisherLocation: 出版地（图书适用）
- year: 年份
- volume: 卷号
- issue: 期号
- pages: 页码
- doi: DOI
- url: URL（网络资源适用）
- accessDate: 访问日期（网络资源适用）
- conferenceName: 会议名称（会议论文适用）
- institution: 学位授予单位（学位论文适用）
- standardNumber: 标准编号（标准适用）

请根据参考文献的内容判断类型，并提取相应字段。如果某字段无法确定，请省略该字段。
不要改写作者、标题等原文内容，不要添加原文没有的文献。

【参考文献】
{raw_references}"#
    )
}
