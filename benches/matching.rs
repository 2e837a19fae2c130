use divan::{Bencher, black_box};
use tokenrules::{
    Analyzer, Checker, CheckerOptions, MatchEngine, MatchOptions, ManualTagger, Sentence, SimpleAnalyzer,
    load_rules,
};

fn main() {
    divan::main();
}

const RULES: &str = r#"
    unification number { sg = pos~"N.*S"; pl = pos~"N.*P"; }
    phrase ART { ["a"] | ["an"] | ["the"] }

    rule DOUBLE_WORD "Repeated word" {
        pattern { [text~"\w+"] [ref=1] }
        message "Remove the repetition: <suggestion>\1</suggestion>";
    }
    rule COULD_OF "could of" {
        pattern { [text~"could|should|would"] marker { ["of"] } }
        message "Did you mean <suggestion>have</suggestion>?";
    }
    rule ART_ADJ_NOUN "Article before plural" {
        pattern { @ART [pos~"JJ", min=0, max=3] marker { [pos="NNS"] } }
        message "Check the article before <match no='3'/>.";
    }
    rule AGREEMENT "Noun agreement" {
        pattern { unify!(number) { [pos~"N.*"] [pos~"N.*"] } }
        message "Nouns do not agree.";
    }
    disambig WALK_NOUN { pattern { [pos="DT"] marker { ["walk"] } } action filter pos="NN"; }
"#;

const DICT: &str = "a\ta\tDT\nan\ta\tDT\nthe\tthe\tDT\n\
    walk\twalk\tNN\nwalk\twalk\tVB\nwalks\twalk\tNNS\nlong\tlong\tJJ\n\
    dog\tdog\tNNS\ndogs\tdog\tNNP\nthey\tthey\tPRP\ncould\tcould\tMD\n";

fn text(sentences: usize) -> String {
    let templates = [
        "They could of taken a long long walk with the dogs.",
        "The dog walks and the the dogs walk.",
        "An long walks could have been better.",
        "Nothing here matches any rule at all.",
    ];
    (0..sentences)
        .map(|i| templates[i % templates.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn analyzed(sentences: usize) -> Vec<Sentence> {
    let analyzer = SimpleAnalyzer::with_tagger(ManualTagger::from_data(DICT).unwrap());
    analyzer.analyze(&text(sentences))
}

#[divan::bench]
fn compile_rules(bencher: Bencher) {
    bencher.bench_local(|| load_rules(black_box(RULES)).unwrap());
}

#[divan::bench(args = [10, 100, 1000])]
fn match_engine(bencher: Bencher, sentences: usize) {
    let rules = load_rules(RULES).unwrap();
    let sentences = analyzed(sentences);
    bencher.bench_local(|| {
        let mut total = 0;
        for rule in &rules.grammar {
            let engine = MatchEngine::new(rule, MatchOptions::default());
            for sentence in &sentences {
                if !engine.can_be_ignored(sentence) {
                    total += engine.find_matches(black_box(sentence)).unwrap().len();
                }
            }
        }
        total
    });
}

#[divan::bench(args = [10, 100, 1000])]
fn check_text(bencher: Bencher, sentences: usize) {
    let analyzer = SimpleAnalyzer::with_tagger(ManualTagger::from_data(DICT).unwrap());
    let checker = Checker::new(load_rules(RULES).unwrap(), CheckerOptions::default());
    let text = text(sentences);
    bencher.bench_local(|| checker.check_text(&analyzer, black_box(&text)).len());
}
