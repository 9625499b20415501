use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, ValueEnum};
use log::info;

use predabs::algorithm::{CegarAlgorithm, Verdict};
use predabs::cfa::{Cfa, CfaBuilder};
use predabs::config::*;
use predabs::cpa::PredicateCpa;
use predabs::formula::{Formula, Sort, Symbol};
use predabs::lemma::file::parse_lemma_file;
use predabs::lemma::LemmaSet;
use predabs::predicates::predmap::{parse_predicate_map, write_predicate_map};
use predabs::predicates::{Precision, PredicatePrecision};
use predabs::shutdown::ShutdownNotifier;
use predabs::solver::{BddSolver, Solver};

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Program {
    /// `i := 0; while (i < 10) i := i + 1; if (i != 10) ERROR`
    Counter,
    /// `x := *; if (x == 42) ERROR`
    Guess,
    /// `x := 1; f(); if (x != 2) ERROR` with `f: x := x + 1`
    Call,
    /// `x := 3; f(); if (x != 0) ERROR` with a recursive countdown in `f`
    Countdown,
    /// `x := *; y := inc(x); if (y == x) ERROR` with `inc` given by a lemma
    Successor,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Abstraction {
    Boolean,
    Cartesian,
    Hybrid,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Frequency {
    EveryLocation,
    LoopHeadsAndFunctions,
    FunctionBoundaries,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Scope {
    Global,
    Function,
    Location,
    LocationInstance,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Built-in program to verify.
    #[arg(value_enum, default_value = "counter")]
    program: Program,

    #[clap(long, value_enum, default_value = "boolean")]
    abstraction: Abstraction,

    #[clap(long, value_enum, default_value = "loop-heads-and-functions")]
    frequency: Frequency,

    /// Where refinement adds new predicates.
    #[clap(long, value_enum, default_value = "location")]
    scope: Scope,

    #[clap(long, value_enum, default_value = "backward")]
    interpolation: Direction,

    /// Merge states at the same location into one path formula.
    #[clap(long)]
    abe: bool,

    /// Summarize every function as a cached block.
    #[clap(long)]
    bam: bool,

    /// Inline lemma definitions instead of asserting them.
    #[clap(long)]
    inline_lemmas: bool,

    /// Stop after this many refinements.
    #[clap(long, value_name = "INT")]
    max_refinements: Option<usize>,

    /// Initial predicates, in predicate map format.
    #[clap(long, value_name = "FILE")]
    predicates: Option<PathBuf>,

    /// Lemma definitions. The `successor` program ships its own.
    #[clap(long, value_name = "FILE")]
    lemmas: Option<PathBuf>,

    /// Write the final predicates to this file.
    #[clap(long, value_name = "FILE")]
    dump_predicates: Option<PathBuf>,
}

const INC_LEMMA: &str = "(lemma inc (forall ((a (_ BitVec 8))) (= (inc a) (bvadd a #x01))))";

fn var(name: &str) -> Formula {
    Formula::var(Symbol::bv(name, 8))
}

fn build(program: Program) -> color_eyre::Result<Cfa> {
    let x = Symbol::bv("x", 8);
    let mut b = CfaBuilder::new();
    let (entry, exit) = b.function("main");
    match program {
        Program::Counter => {
            let i = Symbol::bv("i", 8);
            let head = b.loop_head("main");
            let body = b.node("main");
            let done = b.node("main");
            let err = b.error_node("main");
            b.assign(entry, head, &i, Formula::bv(0, 8));
            b.branch(head, Formula::ult(var("i"), Formula::bv(10, 8)), body, done);
            b.assign(body, head, &i, Formula::bvadd(var("i"), Formula::bv(1, 8)));
            b.branch(done, Formula::eq(var("i"), Formula::bv(10, 8)), exit, err);
        }
        Program::Guess => {
            let n1 = b.node("main");
            let err = b.error_node("main");
            b.havoc(entry, n1, &x);
            b.branch(n1, Formula::eq(var("x"), Formula::bv(42, 8)), err, exit);
        }
        Program::Call => {
            let (f_entry, f_exit) = b.function("f");
            b.assign(f_entry, f_exit, &x, Formula::bvadd(var("x"), Formula::bv(1, 8)));
            let n1 = b.node("main");
            let r1 = b.node("main");
            let err = b.error_node("main");
            b.assign(entry, n1, &x, Formula::bv(1, 8));
            b.call(n1, r1, "f", vec![], None);
            b.branch(r1, Formula::eq(var("x"), Formula::bv(2, 8)), exit, err);
        }
        Program::Countdown => {
            let (f_entry, f_exit) = b.function("f");
            let positive = b.node("f");
            let decremented = b.node("f");
            let returned = b.node("f");
            b.branch(f_entry, Formula::ugt(var("x"), Formula::bv(0, 8)), positive, f_exit);
            b.assign(positive, decremented, &x, Formula::bvsub(var("x"), Formula::bv(1, 8)));
            b.call(decremented, returned, "f", vec![], None);
            b.blank(returned, f_exit);
            let n1 = b.node("main");
            let r1 = b.node("main");
            let err = b.error_node("main");
            b.assign(entry, n1, &x, Formula::bv(3, 8));
            b.call(n1, r1, "f", vec![], None);
            b.branch(r1, Formula::eq(var("x"), Formula::bv(0, 8)), exit, err);
        }
        Program::Successor => {
            let y = Symbol::bv("y", 8);
            let n1 = b.node("main");
            let n2 = b.node("main");
            let err = b.error_node("main");
            b.havoc(entry, n1, &x);
            b.assign(n1, n2, &y, Formula::call("inc", Sort::BitVec(8), vec![var("x")]));
            b.branch(n2, Formula::eq(var("y"), var("x")), err, exit);
        }
    }
    Ok(b.build("main")?)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let config = PredicateConfig {
        abstraction_type: match args.abstraction {
            Abstraction::Boolean => AbstractionType::Boolean,
            Abstraction::Cartesian => AbstractionType::Cartesian,
            Abstraction::Hybrid => AbstractionType::Hybrid,
        },
        abstraction_frequency: match args.frequency {
            Frequency::EveryLocation => AbstractionFrequency::EveryLocation,
            Frequency::LoopHeadsAndFunctions => AbstractionFrequency::LoopHeadsAndFunctions,
            Frequency::FunctionBoundaries => AbstractionFrequency::FunctionBoundaries,
        },
        refinement_scope: match args.scope {
            Scope::Global => RefinementScope::Global,
            Scope::Function => RefinementScope::Function,
            Scope::Location => RefinementScope::Location,
            Scope::LocationInstance => RefinementScope::LocationInstance,
        },
        interpolation: match args.interpolation {
            Direction::Forward => InterpolationDirection::Forward,
            Direction::Backward => InterpolationDirection::Backward,
        },
        merge: if args.abe { MergeStrategy::Abe } else { MergeStrategy::Sep },
        bam: args.bam,
        lemma_mode: if args.inline_lemmas { LemmaMode::Inline } else { LemmaMode::Assert },
        max_refinements: args.max_refinements,
        ..Default::default()
    };

    let cfa = Rc::new(build(args.program)?);
    println!(
        "Program {:?}: {} nodes, {} edges",
        args.program,
        cfa.nodes().len(),
        cfa.edges().len()
    );

    let lemmas = match (&args.lemmas, args.program) {
        (Some(path), _) => parse_lemma_file(&std::fs::read_to_string(path)?)?,
        (None, Program::Successor) => parse_lemma_file(INC_LEMMA)?,
        (None, _) => LemmaSet::new(),
    };

    let solver: Rc<dyn Solver> =
        Rc::new(BddSolver::new(ShutdownNotifier::new()).with_direction(config.interpolation));
    let cpa = PredicateCpa::new(cfa.clone(), &config, solver, lemmas)?;

    let predicates = match &args.predicates {
        Some(path) => parse_predicate_map(&std::fs::read_to_string(path)?, &cfa, &cpa.pmgr)?,
        None => PredicatePrecision::new(),
    };
    info!("Starting with {} predicates", predicates.all_predicates().len());

    let mut cegar = CegarAlgorithm::new(cpa);
    let verdict = cegar.run(Precision::new(predicates, Default::default()));

    println!("Verdict: {}", verdict);
    if let Verdict::Unsafe(info) = &verdict {
        println!("Counterexample:");
        for &edge in &info.edges {
            println!("  {}", cfa.edge(edge));
        }
        match &info.witness {
            Some(witness) => println!("Witness: {}", witness),
            None => println!("Model: {}", info.model),
        }
    }
    println!();
    print!("{}", cegar.cpa().stats);
    println!("Solver: {:?}", cegar.cpa().solver.statistics());

    if let Some(path) = &args.dump_predicates {
        std::fs::write(path, write_predicate_map(&cegar.precision().predicates, &cfa))?;
        println!("Predicates written to {}", path.display());
    }

    let time_total = time_total.elapsed();
    println!("Done in {:.2} s", time_total.as_secs_f64());

    Ok(())
}
